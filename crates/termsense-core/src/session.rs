//! Session driver: owns one child process and its virtual screen, runs
//! the change-gated evaluation tick, tracks the session state machine,
//! surfaces confirmations, and offers the request/response `exec`
//! primitive.

use std::collections::HashMap;
use std::io::Write as IoWrite;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use portable_pty::ChildKiller;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::fingerprint::{default_registry, FingerprintRegistry};
use crate::parser::registry::ConfirmHit;
use crate::parser::{
    ConfirmInfo, ConfirmResponse, ParserContext, ParserRegistry, SemanticOutput, SessionState,
};
use crate::preset::Preset;
use crate::pty::{PtyOptions, PtyProcess};
use crate::screen::Screen;

/// Default evaluation tick interval.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
/// Window the `exec` call allows for the state to leave `idle`.
const EXEC_LEAVE_IDLE_WINDOW: Duration = Duration::from_secs(5);
/// Grace period for `close` before force-killing.
const CLOSE_GRACE: Duration = Duration::from_secs(3);
/// Most recent messages kept in the conversation history.
const MAX_HISTORY_MESSAGES: usize = 1000;

/// A conversation record attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Who produced the message
    pub role: MessageRole,
    /// Message text
    pub content: String,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Point-in-time view of the screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenSnapshot {
    /// Plain screen text including scrollback
    pub text: String,
    /// Cursor column
    pub cursor_x: usize,
    /// Cursor row
    pub cursor_y: usize,
    /// Session state at capture time
    pub state: SessionState,
}

/// Result of an `exec` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecResult {
    /// An output classifier claimed the command output
    Semantic(SemanticOutput),
    /// No classifier claimed it; the raw trimmed text
    Raw(String),
}

impl ExecResult {
    /// The raw text regardless of classification.
    pub fn raw(&self) -> &str {
        match self {
            ExecResult::Semantic(out) => &out.raw,
            ExecResult::Raw(raw) => raw,
        }
    }
}

/// Events emitted by a driver.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Raw bytes arrived from the PTY
    Data(Vec<u8>),
    /// The state machine moved
    StateChange {
        new_state: SessionState,
        prev_state: SessionState,
    },
    /// A confirmation dialog appeared
    ConfirmRequired(ConfirmInfo),
    /// An output record was produced by `exec`
    Output(SemanticOutput),
    /// The child exited
    Exit(i32),
    /// A driver-internal error worth surfacing
    Error(String),
}

/// Decision made by a permission checker for a tool confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Answer the dialog with "yes" automatically
    Allow,
    /// Answer the dialog with "no" automatically
    Deny,
    /// Leave the dialog for a human
    Confirm,
}

/// Callback consulted when a confirmation names a tool.
pub type PermissionChecker = Arc<dyn Fn(&ConfirmInfo) -> PermissionDecision + Send + Sync>;

/// Per-session options.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Command to run; `None` = interactive login shell
    pub command: Option<String>,
    /// Command arguments
    pub args: Vec<String>,
    /// Terminal columns
    pub cols: u16,
    /// Terminal rows
    pub rows: u16,
    /// Working directory
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Lines in the parser-context window
    pub context_lines: usize,
    /// Evaluation tick interval
    pub tick_interval: Duration,
    /// Optional session log file
    pub log_file: Option<PathBuf>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cols: 120,
            rows: 30,
            cwd: None,
            env: HashMap::new(),
            context_lines: 10,
            tick_interval: DEFAULT_TICK_INTERVAL,
            log_file: None,
        }
    }
}

/// The session driver.
pub struct SessionDriver {
    id: String,
    options: SessionOptions,

    state: Arc<RwLock<SessionState>>,
    previous_state: Arc<RwLock<Option<SessionState>>>,
    history: Arc<RwLock<Vec<Message>>>,
    registry: Arc<RwLock<ParserRegistry>>,
    fingerprints: FingerprintRegistry,
    pending_confirm: Arc<RwLock<Option<ConfirmHit>>>,
    /// Raw prompt of the last dialog we answered; the same text lingering
    /// on screen must not be re-acquired as a fresh confirmation.
    answered_prompt: Arc<RwLock<Option<String>>>,
    /// Raw text of the last streamed output record, for deduplication.
    last_output_raw: Arc<RwLock<Option<String>>>,
    permission_checker: Arc<RwLock<Option<PermissionChecker>>>,

    screen: Arc<Mutex<Screen>>,
    pty: Arc<Mutex<Option<PtyProcess>>>,
    killer: Arc<std::sync::Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>>,
    log_sink: Arc<std::sync::Mutex<Option<std::fs::File>>>,

    started: AtomicBool,
    running: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,

    event_tx: broadcast::Sender<SessionEvent>,
    state_tx: broadcast::Sender<(SessionState, SessionState)>,
}

impl std::fmt::Debug for SessionDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionDriver")
            .field("id", &self.id)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SessionDriver {
    /// Create a driver with an explicit registry.
    pub fn new(id: impl Into<String>, options: SessionOptions, registry: ParserRegistry) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        let (state_tx, _) = broadcast::channel(128);
        let screen = Screen::new(options.cols, options.rows);

        Self {
            id: id.into(),
            options,
            state: Arc::new(RwLock::new(SessionState::Starting)),
            previous_state: Arc::new(RwLock::new(None)),
            history: Arc::new(RwLock::new(Vec::new())),
            registry: Arc::new(RwLock::new(registry)),
            fingerprints: default_registry(),
            pending_confirm: Arc::new(RwLock::new(None)),
            answered_prompt: Arc::new(RwLock::new(None)),
            last_output_raw: Arc::new(RwLock::new(None)),
            permission_checker: Arc::new(RwLock::new(None)),
            screen: Arc::new(Mutex::new(screen)),
            pty: Arc::new(Mutex::new(None)),
            killer: Arc::new(std::sync::Mutex::new(None)),
            log_sink: Arc::new(std::sync::Mutex::new(None)),
            started: AtomicBool::new(false),
            running: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
            event_tx,
            state_tx,
        }
    }

    /// Create a driver configured from a preset.
    pub fn from_preset(id: impl Into<String>, preset: &Preset) -> Self {
        let mut options = preset.session_options.clone();
        if options.command.is_none() {
            options.command = preset.command.clone();
            options.args = preset.args.clone();
        }
        Self::new(id, options, preset.build_registry())
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state.
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    /// Whether the driver is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// The conversation history.
    pub async fn history(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    /// The pending confirmation, if any.
    pub async fn pending_confirm(&self) -> Option<ConfirmInfo> {
        self.pending_confirm
            .read()
            .await
            .as_ref()
            .map(|hit| hit.info.clone())
    }

    /// Install a permission checker consulted for tool confirmations.
    pub async fn set_permission_checker(&self, checker: PermissionChecker) {
        *self.permission_checker.write().await = Some(checker);
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to `(new, prev)` state transitions.
    pub fn subscribe_state(&self) -> broadcast::Receiver<(SessionState, SessionState)> {
        self.state_tx.subscribe()
    }

    /// Atomically replace the parser sets from a preset.
    pub async fn load_preset(&self, preset: &Preset) {
        *self.registry.write().await = preset.build_registry();
        debug!(session = %self.id, preset = %preset.name, "parser registry replaced");
    }

    // ========== Lifecycle ==========

    /// Spawn the child and start the read, tick and exit-watch tasks.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::AlreadyStarted);
        }

        info!(session = %self.id, command = ?self.options.command, "starting session");

        let mut pty = PtyProcess::spawn(&PtyOptions {
            command: self.options.command.clone(),
            args: self.options.args.clone(),
            cols: self.options.cols,
            rows: self.options.rows,
            cwd: self.options.cwd.clone(),
            env: self.options.env.clone(),
        })?;

        if let Some(path) = &self.options.log_file {
            match std::fs::File::create(path) {
                Ok(mut file) => {
                    let _ = writeln!(
                        file,
                        "--- session {} started at {} ---",
                        self.id,
                        Utc::now().to_rfc3339()
                    );
                    *self.log_sink.lock().unwrap_or_else(|e| e.into_inner()) = Some(file);
                }
                Err(e) => {
                    warn!(session = %self.id, error = %e, "failed to open session log");
                }
            }
        }

        *self.killer.lock().unwrap_or_else(|e| e.into_inner()) = pty.clone_killer();
        let reader = pty.take_reader()?;
        let child = pty
            .take_child()
            .ok_or_else(|| Error::Pty("child missing after spawn".into()))?;
        *self.pty.lock().await = Some(pty);

        self.running.store(true, Ordering::SeqCst);

        // Feed channel bridges the blocking reader to the async screen.
        let (feed_tx, feed_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        self.spawn_read_loop(reader, feed_tx);
        self.spawn_feed_loop(feed_rx);
        self.spawn_tick_loop();
        self.spawn_exit_watcher(child);

        Ok(())
    }

    fn spawn_read_loop(
        self: &Arc<Self>,
        mut reader: Box<dyn std::io::Read + Send>,
        feed_tx: mpsc::UnboundedSender<Vec<u8>>,
    ) {
        let running = Arc::clone(&self.running);
        let event_tx = self.event_tx.clone();
        let log_sink = Arc::clone(&self.log_sink);

        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            while running.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = buf[..n].to_vec();
                        if let Some(file) =
                            log_sink.lock().unwrap_or_else(|e| e.into_inner()).as_mut()
                        {
                            let _ = file.write_all(&data);
                        }
                        if feed_tx.send(data.clone()).is_err() {
                            break;
                        }
                        let _ = event_tx.send(SessionEvent::Data(data));
                    }
                    Err(_) => break,
                }
            }
        });
    }

    fn spawn_feed_loop(self: &Arc<Self>, mut feed_rx: mpsc::UnboundedReceiver<Vec<u8>>) {
        let screen = Arc::clone(&self.screen);
        tokio::spawn(async move {
            while let Some(data) = feed_rx.recv().await {
                screen.lock().await.write(&data);
            }
        });
    }

    fn spawn_exit_watcher(self: &Arc<Self>, mut child: Box<dyn portable_pty::Child + Send + Sync>) {
        let driver = Arc::clone(self);
        tokio::spawn(async move {
            let exit_code = tokio::task::spawn_blocking(move || child.wait())
                .await
                .ok()
                .and_then(|r| r.ok())
                .map(|status| status.exit_code() as i32)
                .unwrap_or(-1);
            driver.finish(exit_code).await;
        });
    }

    /// Drive the session to `exited`: stop the loops, emit `exit`, drain
    /// waiters, close the log sink. Idempotent.
    async fn finish(&self, exit_code: i32) {
        if self.finished.swap(true, Ordering::SeqCst) {
            return;
        }
        self.running.store(false, Ordering::SeqCst);
        self.transition(SessionState::Exited).await;
        *self.pending_confirm.write().await = None;
        let _ = self.event_tx.send(SessionEvent::Exit(exit_code));

        let mut sink = self.log_sink.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = sink.as_mut() {
            let _ = writeln!(
                file,
                "--- session {} ended at {} ---",
                self.id,
                Utc::now().to_rfc3339()
            );
        }
        *sink = None;

        info!(session = %self.id, exit_code, "session finished");
    }

    /// Graceful close: write the exit command and give the child a grace
    /// period, force-kill otherwise. Never fails.
    pub async fn close(&self, exit_cmd: Option<&str>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        if let Some(cmd) = exit_cmd {
            let mut rx = self.event_tx.subscribe();
            let mut payload = cmd.as_bytes().to_vec();
            payload.push(b'\r');
            if self.write(&payload).await.is_ok() {
                let waited = timeout(CLOSE_GRACE, async {
                    loop {
                        match rx.recv().await {
                            Ok(SessionEvent::Exit(_)) => break,
                            Ok(_) => {}
                            Err(broadcast::error::RecvError::Lagged(_)) => {}
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })
                .await;
                if waited.is_ok() {
                    return;
                }
                debug!(session = %self.id, "graceful close timed out, killing");
            }
        }

        self.kill().await;
    }

    /// Immediate termination. Drives the session to `exited`, which drains
    /// every outstanding waiter. Never fails.
    pub async fn kill(&self) {
        if let Some(killer) = self
            .killer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            let _ = killer.kill();
        }
        self.finish(-1).await;
    }

    // ========== Input ==========

    /// Write raw bytes to the PTY.
    pub async fn write(&self, bytes: &[u8]) -> Result<()> {
        if !self.started.load(Ordering::SeqCst) {
            return Err(Error::NotStarted);
        }
        if !self.running.load(Ordering::SeqCst) {
            return Err(Error::SessionExited);
        }

        if let Some(file) = self
            .log_sink
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            let _ = writeln!(file, "[INPUT] {}", String::from_utf8_lossy(bytes));
        }

        let mut pty = self.pty.lock().await;
        let pty = pty.as_mut().ok_or(Error::NotStarted)?;
        pty.write(bytes)
    }

    /// Write a message followed by carriage return and record it as a
    /// user message.
    pub async fn send(&self, msg: &str) -> Result<()> {
        let mut payload = msg.as_bytes().to_vec();
        payload.push(b'\r');
        self.write(&payload).await?;
        self.push_message(MessageRole::User, msg.trim()).await;
        Ok(())
    }

    /// Record an assistant response in the history.
    pub async fn record_response(&self, content: &str) {
        self.push_message(MessageRole::Assistant, content).await;
    }

    async fn push_message(&self, role: MessageRole, content: &str) {
        let mut history = self.history.write().await;
        history.push(Message {
            role,
            content: content.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        });
        if history.len() > MAX_HISTORY_MESSAGES {
            let drain = history.len() - MAX_HISTORY_MESSAGES;
            history.drain(..drain);
        }
    }

    /// Write Ctrl-C.
    pub async fn interrupt(&self) -> Result<()> {
        self.write(b"\x03").await
    }

    /// Write the escape sequence for a named key; unknown names are a
    /// no-op.
    pub async fn send_key(&self, key: &str) -> Result<()> {
        match key_sequence(key) {
            Some(seq) => self.write(seq).await,
            None => {
                debug!(session = %self.id, key, "unknown key name ignored");
                Ok(())
            }
        }
    }

    /// Resize PTY and screen together.
    pub async fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        {
            let pty = self.pty.lock().await;
            if let Some(pty) = pty.as_ref() {
                pty.resize(cols, rows)?;
            }
        }
        self.screen.lock().await.resize(cols, rows);
        Ok(())
    }

    // ========== Reads ==========

    /// Full screen text including scrollback.
    pub async fn screen_text(&self) -> String {
        self.screen.lock().await.screen_text()
    }

    /// The last `n` screen lines.
    pub async fn last_lines(&self, n: usize) -> Vec<String> {
        self.screen.lock().await.last_lines(n)
    }

    /// A point-in-time snapshot of screen and state.
    pub async fn snapshot(&self) -> ScreenSnapshot {
        let (text, cursor) = {
            let screen = self.screen.lock().await;
            (screen.screen_text(), screen.cursor())
        };
        ScreenSnapshot {
            text,
            cursor_x: cursor.x,
            cursor_y: cursor.y,
            state: self.state().await,
        }
    }

    // ========== Waits ==========

    /// Resolve when the session enters `target`. Rejects on timeout, and
    /// rejects immediately when `error`/`exited` is entered while waiting.
    pub async fn wait_for_state(&self, target: SessionState, wait: Duration) -> Result<()> {
        let mut rx = self.state_tx.subscribe();

        let current = self.state().await;
        if current == target {
            return Ok(());
        }
        if matches!(current, SessionState::Error | SessionState::Exited) {
            return Err(Error::SessionEndedWhileWaiting(current, target));
        }

        let wait_ms = wait.as_millis() as u64;
        timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok((new_state, _)) => {
                        if new_state == target {
                            return Ok(());
                        }
                        if matches!(new_state, SessionState::Error | SessionState::Exited) {
                            return Err(Error::SessionEndedWhileWaiting(new_state, target));
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        // Re-check the live state after losing events.
                        let state = *self.state.read().await;
                        if state == target {
                            return Ok(());
                        }
                        if matches!(state, SessionState::Error | SessionState::Exited) {
                            return Err(Error::SessionEndedWhileWaiting(state, target));
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::SessionExited);
                    }
                }
            }
        })
        .await
        .map_err(|_| Error::WaitTimeout(wait_ms, target))?
    }

    // ========== Exec ==========

    /// Run a command from `idle` and return its classified output.
    ///
    /// Captures the screen length, submits the command, waits for the
    /// state to leave `idle` (≤5 s) and come back (≤`wait`), then feeds
    /// the new screen suffix to the output dispatcher. Commands fast
    /// enough to finish between ticks never show a visible transition;
    /// stable new output with the state still `idle` counts as completion.
    pub async fn exec(&self, cmd: &str, wait: Duration) -> Result<ExecResult> {
        let current = self.state().await;
        if current != SessionState::Idle {
            return Err(Error::WrongState {
                required: SessionState::Idle,
                actual: current,
            });
        }

        let offset = self.screen.lock().await.screen_text().len();
        self.send(cmd).await?;

        let poll = (self.options.tick_interval / 4).max(Duration::from_millis(10));
        // Output must hold still for at least one full tick so the state
        // loop has seen the final screen before we classify it.
        let polls_per_tick =
            (self.options.tick_interval.as_millis() / poll.as_millis()).max(1) as u32;
        let stable_needed = polls_per_tick + 1;

        // Phase 1: leave idle, or quiesce without ever leaving it.
        let deadline = tokio::time::Instant::now() + EXEC_LEAVE_IDLE_WINDOW;
        let mut prev_len = offset;
        let mut stable_polls = 0u32;
        let mut left_idle = false;
        loop {
            tokio::time::sleep(poll).await;
            match self.state().await {
                SessionState::Exited => return Err(Error::SessionExited),
                SessionState::Idle => {}
                _ => {
                    left_idle = true;
                    break;
                }
            }

            let len = self.screen.lock().await.screen_text().len();
            if len != offset && len == prev_len {
                stable_polls += 1;
                if stable_polls >= stable_needed {
                    return self.classify_exec_delta(offset).await;
                }
            } else {
                stable_polls = 0;
            }
            prev_len = len;

            if tokio::time::Instant::now() >= deadline {
                if len != offset {
                    // Output arrived but the state never visibly changed;
                    // the contract "terminates in idle" already holds.
                    return self.classify_exec_delta(offset).await;
                }
                return Err(Error::ExecLeaveIdleTimeout(
                    EXEC_LEAVE_IDLE_WINDOW.as_millis() as u64,
                ));
            }
        }
        debug_assert!(left_idle);

        // Phase 2: return to idle.
        let wait_ms = wait.as_millis() as u64;
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match self.state().await {
                SessionState::Idle => break,
                SessionState::Exited => return Err(Error::SessionExited),
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::ExecTimeout(wait_ms));
            }
            tokio::time::sleep(poll).await;
        }

        self.classify_exec_delta(offset).await
    }

    /// Classify the screen suffix past `offset` as the command's output.
    async fn classify_exec_delta(&self, offset: usize) -> Result<ExecResult> {
        let text = self.screen.lock().await.screen_text();
        let delta = text
            .get(offset..)
            .unwrap_or(text.as_str())
            .trim_end()
            .to_string();

        let lines: Vec<String> = delta.lines().map(|l| l.to_string()).collect();
        let ctx = ParserContext {
            screen_text: delta.clone(),
            last_lines: lines,
            current_state: Some(SessionState::Idle),
            previous_state: *self.previous_state.read().await,
            raw_screen: None,
            terminal_title: None,
        };

        match self.registry.read().await.parse_output(&ctx) {
            Some(output) => {
                let _ = self.event_tx.send(SessionEvent::Output(output.clone()));
                Ok(ExecResult::Semantic(output))
            }
            None => Ok(ExecResult::Raw(delta)),
        }
    }

    // ========== Confirmation ==========

    /// Answer the pending confirmation with parser-formatted bytes.
    pub async fn confirm(&self, response: &ConfirmResponse) -> Result<()> {
        let hit = self
            .pending_confirm
            .write()
            .await
            .take()
            .ok_or(Error::NoPendingConfirm)?;

        // The dialog text stays on screen until the CLI reacts; remember
        // it so the next tick does not re-acquire it.
        *self.answered_prompt.write().await = Some(hit.info.raw_prompt.clone());

        let bytes = hit.parser.format_response(&hit.info, response);
        self.write(&bytes).await
    }

    // ========== Evaluation tick ==========

    fn spawn_tick_loop(self: &Arc<Self>) {
        let driver = Arc::clone(self);
        let tick_interval = self.options.tick_interval;

        tokio::spawn(async move {
            let mut ticker = interval(tick_interval);
            let mut last_generation = 0u64;

            while driver.running.load(Ordering::SeqCst) {
                ticker.tick().await;
                if !driver.running.load(Ordering::SeqCst) {
                    break;
                }
                last_generation = driver.evaluate(last_generation).await;
            }
        });
    }

    /// One evaluation tick. Returns the screen generation it observed.
    async fn evaluate(&self, last_generation: u64) -> u64 {
        let (generation, ctx) = {
            let screen = self.screen.lock().await;
            if !screen.changed_since(last_generation) {
                return last_generation;
            }
            let generation = screen.generation();
            let ctx = ParserContext {
                screen_text: screen.screen_text(),
                last_lines: screen.last_lines(self.options.context_lines),
                current_state: None,
                previous_state: None,
                raw_screen: None,
                terminal_title: screen.terminal_title(),
            };
            (generation, ctx)
        };

        let current = self.state().await;
        let previous = *self.previous_state.read().await;
        let ctx = ParserContext {
            current_state: Some(current),
            previous_state: previous,
            ..ctx
        };

        // Confirmation dispatch runs before state dispatch.
        let confirm_hit = self.registry.read().await.detect_confirm(&ctx);
        if let Some(hit) = confirm_hit {
            let stale = self
                .answered_prompt
                .read()
                .await
                .as_deref()
                .is_some_and(|answered| answered == hit.info.raw_prompt);
            if !stale {
                self.handle_confirm_hit(hit, current).await;
                return generation;
            }
        } else {
            if self.pending_confirm.read().await.is_some() {
                // The dialog disappeared without an answer from us.
                *self.pending_confirm.write().await = None;
            }
            if self.answered_prompt.read().await.is_some() {
                *self.answered_prompt.write().await = None;
            }
        }

        if let Some(detection) = self.registry.read().await.detect_state(&ctx) {
            // The trust dialog during startup is answered automatically.
            if detection
                .meta
                .as_ref()
                .and_then(|m| m.needs_trust_confirm)
                .unwrap_or(false)
            {
                debug!(session = %self.id, "auto-confirming trust dialog");
                if let Err(e) = self.write(b"\r").await {
                    let _ = self
                        .event_tx
                        .send(SessionEvent::Error(format!("trust confirm failed: {e}")));
                }
                return generation;
            }
            self.transition(detection.state).await;
        }

        // Stream status/tool records while the fingerprints say there is
        // something worth classifying on screen.
        let hints = self.fingerprints.extract(&ctx).hints;
        if hints.has_spinner || hints.has_tool_output {
            if let Some(output) = self.registry.read().await.parse_output(&ctx) {
                let mut last = self.last_output_raw.write().await;
                if last.as_deref() != Some(output.raw.as_str()) {
                    *last = Some(output.raw.clone());
                    let _ = self.event_tx.send(SessionEvent::Output(output));
                }
            }
        }

        generation
    }

    async fn handle_confirm_hit(&self, hit: ConfirmHit, current: SessionState) {
        let already_pending = self.pending_confirm.read().await.is_some();
        if !already_pending {
            let info = hit.info.clone();
            *self.pending_confirm.write().await = Some(hit);

            // Tool confirmations may be decided by the permission checker.
            if info.tool.is_some() {
                let checker = self.permission_checker.read().await.clone();
                if let Some(checker) = checker {
                    match checker(&info) {
                        PermissionDecision::Allow => {
                            debug!(session = %self.id, "permission checker allowed tool");
                            let _ = self.confirm(&ConfirmResponse::confirm()).await;
                            return;
                        }
                        PermissionDecision::Deny => {
                            debug!(session = %self.id, "permission checker denied tool");
                            let _ = self.confirm(&ConfirmResponse::deny()).await;
                            return;
                        }
                        PermissionDecision::Confirm => {}
                    }
                }
            }

            if current != SessionState::Confirming {
                self.transition(SessionState::Confirming).await;
            }
            let _ = self.event_tx.send(SessionEvent::ConfirmRequired(info));
        } else if current != SessionState::Confirming {
            self.transition(SessionState::Confirming).await;
        }
    }

    /// Move the state machine; idempotent, `exited` is absorbing.
    async fn transition(&self, new_state: SessionState) {
        let mut state = self.state.write().await;
        let prev = *state;
        if prev == new_state || prev.is_terminal() {
            return;
        }
        *state = new_state;
        drop(state);

        *self.previous_state.write().await = Some(prev);

        info!(session = %self.id, from = %prev, to = %new_state, "state transition");
        let _ = self.state_tx.send((new_state, prev));
        let _ = self.event_tx.send(SessionEvent::StateChange {
            new_state,
            prev_state: prev,
        });
    }
}

/// Escape sequence for a named key, `None` for unknown names.
fn key_sequence(key: &str) -> Option<&'static [u8]> {
    let seq: &'static [u8] = match key.to_ascii_lowercase().as_str() {
        "enter" => b"\r",
        "tab" => b"\t",
        "escape" | "esc" => b"\x1b",
        "backspace" => b"\x7f",
        "space" => b" ",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "delete" => b"\x1b[3~",
        "ctrl+c" => b"\x03",
        "ctrl+d" => b"\x04",
        "ctrl+z" => b"\x1a",
        _ => return None,
    };
    Some(seq)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{
        OutputData, ParserMeta, StateDetection, StateParser,
    };

    fn idle_registry() -> ParserRegistry {
        let mut registry = ParserRegistry::new();
        registry.register_state(std::sync::Arc::new(
            crate::parser::GenericShellStateParser::new(),
        ));
        registry
    }

    fn driver(registry: ParserRegistry) -> Arc<SessionDriver> {
        Arc::new(SessionDriver::new(
            "session-test-abc123",
            SessionOptions::default(),
            registry,
        ))
    }

    #[test]
    fn test_key_sequences() {
        assert_eq!(key_sequence("enter"), Some(b"\r".as_slice()));
        assert_eq!(key_sequence("Down"), Some(b"\x1b[B".as_slice()));
        assert_eq!(key_sequence("Ctrl+C"), Some(b"\x03".as_slice()));
        assert_eq!(key_sequence("hyperkey"), None);
    }

    #[test]
    fn test_exec_result_raw_accessor() {
        let raw = ExecResult::Raw("plain".into());
        assert_eq!(raw.raw(), "plain");

        let semantic = ExecResult::Semantic(SemanticOutput {
            raw: "{}".into(),
            data: OutputData::Json {
                value: serde_json::json!({}),
            },
            confidence: 0.95,
            parser_name: "json-output".into(),
        });
        assert_eq!(semantic.raw(), "{}");
    }

    #[tokio::test]
    async fn test_initial_state_is_starting() {
        let driver = driver(idle_registry());
        assert_eq!(driver.state().await, SessionState::Starting);
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn test_write_before_start_fails() {
        let driver = driver(idle_registry());
        let err = driver.write(b"x").await.unwrap_err();
        assert_eq!(err.kind(), "session_not_started");
    }

    #[tokio::test]
    async fn test_confirm_without_pending_fails() {
        let driver = driver(idle_registry());
        let err = driver.confirm(&ConfirmResponse::confirm()).await.unwrap_err();
        assert_eq!(err.kind(), "no_pending_confirmation");
    }

    #[tokio::test]
    async fn test_exec_outside_idle_fails() {
        let driver = driver(idle_registry());
        let err = driver
            .exec("ls", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "wrong_state");
    }

    #[tokio::test]
    async fn test_transition_emits_once_and_exited_absorbs() {
        let driver = driver(idle_registry());
        let mut rx = driver.subscribe_state();

        driver.transition(SessionState::Idle).await;
        driver.transition(SessionState::Idle).await; // idempotent
        driver.transition(SessionState::Exited).await;
        driver.transition(SessionState::Thinking).await; // absorbed

        let (new_state, prev) = rx.recv().await.unwrap();
        assert_eq!(new_state, SessionState::Idle);
        assert_eq!(prev, SessionState::Starting);

        let (new_state, _) = rx.recv().await.unwrap();
        assert_eq!(new_state, SessionState::Exited);

        // No further transitions: the channel is empty.
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
        assert_eq!(driver.state().await, SessionState::Exited);
    }

    #[tokio::test]
    async fn test_wait_for_state_resolves_on_transition() {
        let driver = driver(idle_registry());
        let waiter = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .wait_for_state(SessionState::Idle, Duration::from_secs(2))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.transition(SessionState::Idle).await;
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_state_times_out() {
        let driver = driver(idle_registry());
        let err = driver
            .wait_for_state(SessionState::Idle, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "wait_timeout");
    }

    #[tokio::test]
    async fn test_wait_rejected_when_session_ends() {
        let driver = driver(idle_registry());
        let waiter = {
            let driver = Arc::clone(&driver);
            tokio::spawn(async move {
                driver
                    .wait_for_state(SessionState::Idle, Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.transition(SessionState::Exited).await;

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), "session_ended_while_waiting");
    }

    #[tokio::test]
    async fn test_tick_detects_state_from_screen() {
        let driver = driver(idle_registry());
        driver.screen.lock().await.write(b"user@host:~$ ");

        let generation = driver.evaluate(0).await;
        assert!(generation > 0);
        assert_eq!(driver.state().await, SessionState::Idle);

        // Unchanged screen: evaluation is a no-op at the same generation.
        let again = driver.evaluate(generation).await;
        assert_eq!(again, generation);
    }

    #[tokio::test]
    async fn test_tick_surfaces_confirmation() {
        let mut registry = idle_registry();
        registry.register_confirm(std::sync::Arc::new(
            crate::parser::GenericYesNoParser::new(),
        ));
        let driver = driver(registry);
        let mut rx = driver.subscribe();

        driver
            .screen
            .lock()
            .await
            .write(b"Overwrite existing file? [y/N]");
        driver.evaluate(0).await;

        assert_eq!(driver.state().await, SessionState::Confirming);
        let pending = driver.pending_confirm().await.unwrap();
        assert!(pending.prompt.contains("Overwrite"));

        // ConfirmRequired emitted exactly once per acquisition.
        let mut confirm_events = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::ConfirmRequired(_)) {
                confirm_events += 1;
            }
        }
        assert_eq!(confirm_events, 1);

        // Re-evaluating the same dialog does not re-emit.
        driver.screen.lock().await.write(b" ");
        driver.evaluate(0).await;
        let mut more = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::ConfirmRequired(_)) {
                more += 1;
            }
        }
        assert_eq!(more, 0);
    }

    struct TrustParser {
        meta: ParserMeta,
    }

    impl StateParser for TrustParser {
        fn meta(&self) -> &ParserMeta {
            &self.meta
        }
        fn detect_state(&self, ctx: &ParserContext) -> Option<StateDetection> {
            ctx.screen_text.contains("trust this project").then(|| {
                StateDetection::new(SessionState::Starting, 0.95).with_meta(
                    crate::parser::StateMeta {
                        needs_trust_confirm: Some(true),
                        ..Default::default()
                    },
                )
            })
        }
    }

    #[tokio::test]
    async fn test_pending_confirm_implies_confirming() {
        let mut registry = ParserRegistry::new();
        registry.register_confirm(std::sync::Arc::new(
            crate::parser::GenericYesNoParser::new(),
        ));
        let driver = driver(registry);

        driver.screen.lock().await.write(b"Continue? [Y/n]");
        driver.evaluate(0).await;

        // Invariant: pending_confirm != none => state = confirming.
        assert!(driver.pending_confirm().await.is_some());
        assert_eq!(driver.state().await, SessionState::Confirming);
    }

    #[tokio::test]
    async fn test_trust_dialog_not_treated_as_state_change() {
        let mut registry = ParserRegistry::new();
        registry.register_state(std::sync::Arc::new(TrustParser {
            meta: ParserMeta::new("trust-test", 100),
        }));
        let driver = driver(registry);

        driver
            .screen
            .lock()
            .await
            .write(b"Do you trust this project?");
        // The write fails (no PTY), but the state must stay `starting`
        // rather than transitioning anywhere else.
        driver.evaluate(0).await;
        assert_eq!(driver.state().await, SessionState::Starting);
    }

    #[tokio::test]
    async fn test_history_records_roles() {
        let driver = driver(idle_registry());
        driver.push_message(MessageRole::User, "hello").await;
        driver.record_response("world").await;

        let history = driver.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, MessageRole::User);
        assert_eq!(history[0].content, "hello");
        assert_eq!(history[1].role, MessageRole::Assistant);
        assert!(history[0].timestamp <= history[1].timestamp);
    }

    #[tokio::test]
    async fn test_history_caps_length() {
        let driver = driver(idle_registry());
        for i in 0..(MAX_HISTORY_MESSAGES + 10) {
            driver
                .push_message(MessageRole::User, &format!("m{i}"))
                .await;
        }
        let history = driver.history().await;
        assert_eq!(history.len(), MAX_HISTORY_MESSAGES);
        assert_eq!(history[0].content, "m10");
    }

    #[tokio::test]
    async fn test_load_preset_swaps_registry() {
        let driver = driver(ParserRegistry::new());
        assert!(driver.registry.read().await.state_parsers().is_empty());

        driver.load_preset(&crate::preset::shell_preset()).await;
        assert_eq!(driver.registry.read().await.state_parsers().len(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_shape() {
        let driver = driver(idle_registry());
        driver.screen.lock().await.write(b"abc");
        let snapshot = driver.snapshot().await;
        assert_eq!(snapshot.text, "abc");
        assert_eq!(snapshot.cursor_x, 3);
        assert_eq!(snapshot.state, SessionState::Starting);
    }
}
