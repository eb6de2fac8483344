//! Generic shell state detector.
//!
//! Recognises common prompt tails as `idle`, trailing-dots and braille
//! spinners as `tool_running`, and well-known shell error messages as
//! `error`.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::parser::{
    ParserContext, ParserMeta, SessionState, StateDetection, StateParser,
};

/// Prompt tails: a line ending in `❯`, `$`, `#`, `>` or `%` covers plain
/// prompts, `user@host:~$` shapes and virtual-env prefixed prompts alike.
static PROMPT_TAIL: Lazy<Regex> = Lazy::new(|| Regex::new(r"[❯$#>%]\s*$").unwrap());

/// Progress indicators: trailing ellipsis or a braille spinner glyph.
static PROGRESS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\.{3}\s*$|[⠁⠂⠄⠆⠇⠋⠙⠸⠴⠦⠧⠏⠿⡿⣟⣯⣷⣾⣽⣻⢿]").unwrap());

/// Shell error messages. The `bash:`/`zsh:`/`sh:` prefix is anchored to
/// the line start and must be followed by actual message text so prompts
/// like `root@host: ~#` never match.
static SHELL_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"command not found|No such file or directory|Permission denied|^(?:bash|zsh|sh):\s+\S",
    )
    .unwrap()
});

/// Generic shell state detector (priority 10).
pub struct GenericShellStateParser {
    meta: ParserMeta,
}

impl Default for GenericShellStateParser {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericShellStateParser {
    pub fn new() -> Self {
        Self {
            meta: ParserMeta::new("generic-shell-state", 10)
                .with_description("Detects idle/busy/error states of a plain shell"),
        }
    }

    fn has_prompt(&self, lines: &[String]) -> bool {
        lines.iter().any(|l| PROMPT_TAIL.is_match(l.trim_end()))
    }

    fn has_progress(&self, lines: &[String]) -> bool {
        lines
            .iter()
            .rev()
            .take(3)
            .any(|l| PROGRESS.is_match(l.trim_end()))
    }

    fn has_error(&self, lines: &[String]) -> bool {
        lines.iter().any(|l| SHELL_ERROR.is_match(l))
    }
}

impl StateParser for GenericShellStateParser {
    fn meta(&self) -> &ParserMeta {
        &self.meta
    }

    fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection> {
        // Errors first: "command not found" usually shares the screen with
        // the next prompt, and the error is the more useful signal.
        if self.has_error(&ctx.last_lines) && !self.has_prompt(&ctx.last_lines) {
            return Some(StateDetection::new(SessionState::Error, 0.8));
        }

        if self.has_prompt(&ctx.last_lines) {
            return Some(StateDetection::new(SessionState::Idle, 0.7));
        }

        if self.has_progress(&ctx.last_lines) {
            return Some(StateDetection::new(SessionState::ToolRunning, 0.6));
        }

        None
    }
}
