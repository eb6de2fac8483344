//! Virtual screen: an alacritty-backed ANSI-aware line buffer.
//!
//! The engine never interprets control sequences itself; raw PTY bytes are
//! fed through `alacritty_terminal`'s VTE processor and read back as clean
//! lines. The wrapper adds a change generation counter (the driver's tick
//! is gated on it) and captures the OSC window title.

use std::sync::{Arc, Mutex};

use alacritty_terminal::event::{Event as TermEvent, EventListener};
use alacritty_terminal::grid::Dimensions;
use alacritty_terminal::index::Line;
use alacritty_terminal::term::cell::Flags;
use alacritty_terminal::term::{Config as TermConfig, Term};
use alacritty_terminal::vte::ansi::Processor;

/// Scrollback capacity in lines.
const SCROLLBACK_LINES: usize = 10_000;

/// Terminal size handed to alacritty.
#[derive(Debug, Clone, Copy)]
struct TermSize {
    cols: usize,
    rows: usize,
}

impl Dimensions for TermSize {
    fn total_lines(&self) -> usize {
        self.rows + SCROLLBACK_LINES
    }

    fn screen_lines(&self) -> usize {
        self.rows
    }

    fn columns(&self) -> usize {
        self.cols
    }
}

/// Captures title events emitted by the emulator.
#[derive(Clone)]
struct TitleListener {
    title: Arc<Mutex<Option<String>>>,
}

impl EventListener for TitleListener {
    fn send_event(&self, event: TermEvent) {
        match event {
            TermEvent::Title(title) => {
                *self.title.lock().unwrap_or_else(|e| e.into_inner()) = Some(title);
            }
            TermEvent::ResetTitle => {
                *self.title.lock().unwrap_or_else(|e| e.into_inner()) = None;
            }
            _ => {}
        }
    }
}

/// Cursor position in screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorPos {
    /// Column, 0-based
    pub x: usize,
    /// Row, 0-based from the top of the visible screen
    pub y: usize,
}

/// ANSI-aware virtual screen.
pub struct Screen {
    term: Term<TitleListener>,
    processor: Processor,
    title: Arc<Mutex<Option<String>>>,
    size: TermSize,
    generation: u64,
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("cols", &self.size.cols)
            .field("rows", &self.size.rows)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl Screen {
    /// Create a screen with the given dimensions.
    pub fn new(cols: u16, rows: u16) -> Self {
        let size = TermSize {
            cols: cols as usize,
            rows: rows as usize,
        };
        let title = Arc::new(Mutex::new(None));
        let listener = TitleListener {
            title: Arc::clone(&title),
        };
        let term = Term::new(TermConfig::default(), &size, listener);

        Self {
            term,
            processor: Processor::new(),
            title,
            size,
            generation: 0,
        }
    }

    /// Feed raw PTY bytes through the emulator.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        for byte in bytes {
            self.processor.advance(&mut self.term, *byte);
        }
        self.generation = self.generation.wrapping_add(1);
    }

    /// Monotonic change counter; bumps on every `write`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the screen changed since a previously observed generation.
    pub fn changed_since(&self, generation: u64) -> bool {
        self.generation != generation
    }

    fn line_text(&self, line: Line) -> String {
        let row = &self.term.grid()[line];
        row.into_iter()
            .filter(|cell| !cell.flags.contains(Flags::WIDE_CHAR_SPACER))
            .map(|cell| cell.c)
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    /// Full scrollback + visible screen as plain text, trailing blank
    /// lines removed.
    pub fn screen_text(&self) -> String {
        let grid = self.term.grid();
        let history = grid.history_size();
        let rows = grid.screen_lines();

        let mut lines = Vec::with_capacity(history + rows);
        for i in (1..=history).rev() {
            lines.push(self.line_text(Line(-(i as i32))));
        }
        for y in 0..rows {
            lines.push(self.line_text(Line(y as i32)));
        }

        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }

    /// The last visible non-empty line, if any.
    pub fn last_line(&self) -> Option<String> {
        self.last_lines(self.size.rows)
            .into_iter()
            .rev()
            .find(|l| !l.is_empty())
    }

    /// The last `n` lines across scrollback + visible screen, oldest
    /// first. Trailing blank lines are dropped before the window is cut.
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let grid = self.term.grid();
        let history = grid.history_size();
        let rows = grid.screen_lines();

        let mut lines = Vec::with_capacity(history + rows);
        for i in (1..=history).rev() {
            lines.push(self.line_text(Line(-(i as i32))));
        }
        for y in 0..rows {
            lines.push(self.line_text(Line(y as i32)));
        }
        while lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }

        let start = lines.len().saturating_sub(n);
        lines.split_off(start)
    }

    /// Current cursor position on the visible screen.
    pub fn cursor(&self) -> CursorPos {
        let point = self.term.grid().cursor.point;
        CursorPos {
            x: point.column.0,
            y: point.line.0.max(0) as usize,
        }
    }

    /// The OSC window title, when one was set.
    pub fn terminal_title(&self) -> Option<String> {
        self.title
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Current dimensions as (cols, rows).
    pub fn dimensions(&self) -> (u16, u16) {
        (self.size.cols as u16, self.size.rows as u16)
    }

    /// Resize the emulator grid.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.size = TermSize {
            cols: cols as usize,
            rows: rows as usize,
        };
        self.term.resize(self.size);
        self.generation = self.generation.wrapping_add(1);
    }

    /// Erase the visible screen and home the cursor.
    pub fn clear(&mut self) {
        self.write(b"\x1b[2J\x1b[H");
    }

    /// Throw away all state, including scrollback and title.
    pub fn reset(&mut self) {
        let listener = TitleListener {
            title: Arc::clone(&self.title),
        };
        *self.title.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.term = Term::new(TermConfig::default(), &self.size, listener);
        self.processor = Processor::new();
        self.generation = self.generation.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_roundtrip() {
        let mut screen = Screen::new(80, 24);
        screen.write(b"hello world\r\nsecond line");

        let text = screen.screen_text();
        assert!(text.contains("hello world"));
        assert!(text.contains("second line"));
    }

    #[test]
    fn test_ansi_codes_are_interpreted() {
        let mut screen = Screen::new(80, 24);
        // Bold red "error" followed by a reset: styling must not leak into text.
        screen.write(b"\x1b[1;31merror\x1b[0m plain");
        assert_eq!(screen.screen_text(), "error plain");
    }

    #[test]
    fn test_last_lines_window() {
        let mut screen = Screen::new(80, 24);
        screen.write(b"one\r\ntwo\r\nthree\r\nfour");

        assert_eq!(screen.last_lines(2), vec!["three", "four"]);
        assert_eq!(screen.last_lines(10), vec!["one", "two", "three", "four"]);
        assert_eq!(screen.last_line().as_deref(), Some("four"));
    }

    #[test]
    fn test_generation_tracks_writes() {
        let mut screen = Screen::new(80, 24);
        let g0 = screen.generation();
        assert!(!screen.changed_since(g0));

        screen.write(b"data");
        assert!(screen.changed_since(g0));

        let g1 = screen.generation();
        screen.write(b"");
        assert_eq!(screen.generation(), g1); // empty writes are ignored
    }

    #[test]
    fn test_cursor_moves_with_output() {
        let mut screen = Screen::new(80, 24);
        assert_eq!(screen.cursor(), CursorPos { x: 0, y: 0 });

        screen.write(b"abc");
        assert_eq!(screen.cursor(), CursorPos { x: 3, y: 0 });

        screen.write(b"\r\n");
        let cursor = screen.cursor();
        assert_eq!(cursor.x, 0);
        assert_eq!(cursor.y, 1);
    }

    #[test]
    fn test_osc_title_capture() {
        let mut screen = Screen::new(80, 24);
        assert!(screen.terminal_title().is_none());

        screen.write(b"\x1b]0;\xe2\xa0\x90 Greeting\x07");
        assert_eq!(screen.terminal_title().as_deref(), Some("⠐ Greeting"));
    }

    #[test]
    fn test_clear_erases_visible_text() {
        let mut screen = Screen::new(80, 24);
        screen.write(b"before clear");
        screen.clear();
        assert_eq!(screen.cursor(), CursorPos { x: 0, y: 0 });
        assert!(!screen.last_lines(24).iter().any(|l| l.contains("before")));
    }

    #[test]
    fn test_reset_drops_everything() {
        let mut screen = Screen::new(80, 24);
        screen.write(b"\x1b]0;title\x07content");
        screen.reset();
        assert_eq!(screen.screen_text(), "");
        assert!(screen.terminal_title().is_none());
    }

    #[test]
    fn test_resize_changes_dimensions() {
        let mut screen = Screen::new(80, 24);
        screen.resize(120, 40);
        assert_eq!(screen.dimensions(), (120, 40));
    }

    #[test]
    fn test_scrollback_retained_in_text() {
        let mut screen = Screen::new(80, 5);
        for i in 0..20 {
            screen.write(format!("line-{i}\r\n").as_bytes());
        }
        let text = screen.screen_text();
        // Early lines scrolled out of the 5-row viewport but live in history.
        assert!(text.contains("line-0"));
        assert!(text.contains("line-19"));
    }
}
