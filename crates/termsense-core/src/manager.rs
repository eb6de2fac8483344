//! Session manager: multiplexes drivers, enforces quota and idle
//! eviction, resolves presets, and wraps `exec` results as enhanced
//! outputs for external callers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use crate::enrich::{create_enhanced_output, EnhancedOutput, EnrichContext};
use crate::error::{Error, Result};
use crate::parser::{ConfirmInfo, ConfirmResponse, SemanticOutput, SessionState};
use crate::preset;
use crate::session::{ExecResult, SessionDriver, SessionEvent, SessionOptions};

/// Manager configuration.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Hard cap on concurrent sessions
    pub max_sessions: usize,
    /// Idle age after which a session is force-destroyed
    pub idle_timeout: Duration,
    /// How often the eviction sweep runs
    pub sweep_interval: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            idle_timeout: Duration::from_secs(30 * 60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Options accepted by [`SessionManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Preset name: `shell`, `claude-code` or `docker` (default `shell`)
    pub preset: Option<String>,
    /// Command override; the preset's command otherwise
    pub command: Option<String>,
    /// Arguments for the command override
    pub args: Vec<String>,
    /// Working directory
    pub cwd: Option<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Terminal columns
    pub cols: Option<u16>,
    /// Terminal rows
    pub rows: Option<u16>,
    /// Optional session log file
    pub log_file: Option<std::path::PathBuf>,
    /// Directory for per-session logs when `log_file` is not given; the
    /// file becomes `<log_dir>/<session_id>.log`
    pub log_dir: Option<std::path::PathBuf>,
}

/// Summary of a managed session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionSummary {
    /// Session id
    pub id: String,
    /// Preset the session was created from
    pub preset: String,
    /// Current state
    pub state: SessionState,
    /// Creation time, epoch milliseconds
    pub created_at: i64,
    /// Milliseconds since the last observed activity
    pub idle_ms: u64,
}

/// Manager-level events.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// The manager is up and serving
    Ready,
    /// A session was created
    Created { session_id: String },
    /// A session changed state
    StateChange {
        session_id: String,
        new_state: SessionState,
        prev_state: SessionState,
    },
    /// A session requires confirmation
    ConfirmRequired {
        session_id: String,
        info: ConfirmInfo,
    },
    /// A session was destroyed or exited
    Removed { session_id: String, exit_code: i32 },
}

struct ManagedSession {
    driver: Arc<SessionDriver>,
    preset_name: String,
    created_at: i64,
    last_activity: Arc<std::sync::Mutex<Instant>>,
}

impl ManagedSession {
    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }
}

/// Multiplexes many session drivers behind string ids.
pub struct SessionManager {
    config: ManagerConfig,
    sessions: Arc<RwLock<HashMap<String, Arc<ManagedSession>>>>,
    event_tx: broadcast::Sender<ManagerEvent>,
}

impl SessionManager {
    /// Create a manager with default configuration.
    pub fn new() -> Arc<Self> {
        Self::with_config(ManagerConfig::default())
    }

    /// Create a manager and start its eviction sweep.
    pub fn with_config(config: ManagerConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        let manager = Arc::new(Self {
            config,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        });
        manager.spawn_sweep();
        let _ = manager.event_tx.send(ManagerEvent::Ready);
        manager
    }

    /// Subscribe to manager events.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.event_tx.subscribe()
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Create and start a session from a preset.
    pub async fn create(self: &Arc<Self>, options: CreateOptions) -> Result<String> {
        {
            let sessions = self.sessions.read().await;
            if sessions.len() >= self.config.max_sessions {
                return Err(Error::SessionLimitReached(self.config.max_sessions));
            }
        }

        let preset_name = options.preset.as_deref().unwrap_or("shell").to_string();
        let preset = preset::resolve(&preset_name)?;

        let mut session_options: SessionOptions = preset.session_options.clone();
        session_options.command = options.command.or_else(|| preset.command.clone());
        session_options.args = if session_options.command.is_some() && !options.args.is_empty() {
            options.args
        } else {
            preset.args.clone()
        };
        if let Some(cols) = options.cols {
            session_options.cols = cols;
        }
        if let Some(rows) = options.rows {
            session_options.rows = rows;
        }
        session_options.cwd = options.cwd;
        session_options.env = options.env;

        let id = generate_session_id();
        session_options.log_file = options.log_file.or_else(|| {
            options.log_dir.as_ref().map(|dir| {
                if !dir.exists() {
                    let _ = std::fs::create_dir_all(dir);
                }
                dir.join(format!("{id}.log"))
            })
        });
        let driver = Arc::new(SessionDriver::new(
            id.clone(),
            session_options,
            preset.build_registry(),
        ));

        let managed = Arc::new(ManagedSession {
            driver: Arc::clone(&driver),
            preset_name,
            created_at: chrono::Utc::now().timestamp_millis(),
            last_activity: Arc::new(std::sync::Mutex::new(Instant::now())),
        });

        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&managed));

        // The forwarder must be subscribed before the child spawns so an
        // immediately-exiting command cannot race past its Exit event.
        self.spawn_event_forwarder(id.clone(), managed);

        if let Err(e) = driver.start().await {
            self.sessions.write().await.remove(&id);
            return Err(e);
        }

        info!(session = %id, "session created");
        let _ = self.event_tx.send(ManagerEvent::Created {
            session_id: id.clone(),
        });

        Ok(id)
    }

    /// Forward driver events, bump activity on transitions, and drop the
    /// map entry when the session exits.
    fn spawn_event_forwarder(self: &Arc<Self>, id: String, managed: Arc<ManagedSession>) {
        let manager = Arc::clone(self);
        let mut rx = managed.driver.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SessionEvent::StateChange {
                        new_state,
                        prev_state,
                    }) => {
                        managed.touch();
                        let _ = manager.event_tx.send(ManagerEvent::StateChange {
                            session_id: id.clone(),
                            new_state,
                            prev_state,
                        });
                    }
                    Ok(SessionEvent::ConfirmRequired(info)) => {
                        managed.touch();
                        let _ = manager.event_tx.send(ManagerEvent::ConfirmRequired {
                            session_id: id.clone(),
                            info,
                        });
                    }
                    Ok(SessionEvent::Exit(exit_code)) => {
                        // `destroy` may already have removed the entry; only
                        // announce removals this forwarder performed.
                        if manager.sessions.write().await.remove(&id).is_some() {
                            let _ = manager.event_tx.send(ManagerEvent::Removed {
                                session_id: id.clone(),
                                exit_code,
                            });
                            debug!(session = %id, exit_code, "session removed after exit");
                        }
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    fn spawn_sweep(self: &Arc<Self>) {
        let manager = Arc::downgrade(self);
        let sweep_interval = self.config.sweep_interval;
        let idle_timeout = self.config.idle_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };

                let stale: Vec<String> = {
                    let sessions = manager.sessions.read().await;
                    sessions
                        .iter()
                        .filter(|(_, m)| m.idle_for() >= idle_timeout)
                        .map(|(id, _)| id.clone())
                        .collect()
                };

                for id in stale {
                    info!(session = %id, "evicting idle session");
                    if let Err(e) = manager.destroy(&id, true).await {
                        error!(session = %id, error = %e, "idle eviction failed");
                    }
                }
            }
        });
    }

    async fn get(&self, id: &str) -> Result<Arc<ManagedSession>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    /// Destroy a session: graceful close with `exit` unless forced.
    pub async fn destroy(&self, id: &str, force: bool) -> Result<()> {
        let managed = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| Error::UnknownSession(id.to_string()))?
        };

        if force {
            managed.driver.kill().await;
        } else {
            managed.driver.close(Some("exit")).await;
        }

        let _ = self.event_tx.send(ManagerEvent::Removed {
            session_id: id.to_string(),
            exit_code: -1,
        });
        Ok(())
    }

    /// Destroy every session.
    pub async fn destroy_all(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            if let Err(e) = self.destroy(&id, true).await {
                debug!(session = %id, error = %e, "destroy_all skipped session");
            }
        }
    }

    /// Summaries of every live session.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.read().await;
        let mut out = Vec::with_capacity(sessions.len());
        for (id, managed) in sessions.iter() {
            out.push(SessionSummary {
                id: id.clone(),
                preset: managed.preset_name.clone(),
                state: managed.driver.state().await,
                created_at: managed.created_at,
                idle_ms: managed.idle_for().as_millis() as u64,
            });
        }
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    /// Execute a command in a session, measure the wall clock, and return
    /// an enhanced output. Raw strings are wrapped as `text` records; pass
    /// `parse_output = false` to skip classification entirely.
    pub async fn exec(
        &self,
        id: &str,
        cmd: &str,
        wait: Duration,
        parse_output: bool,
    ) -> Result<EnhancedOutput> {
        let managed = self.get(id).await?;
        managed.touch();

        let started = Instant::now();
        let result = managed.driver.exec(cmd, wait).await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output: SemanticOutput = match result {
            ExecResult::Semantic(output) if parse_output => output,
            ExecResult::Semantic(output) => SemanticOutput::text(output.raw),
            ExecResult::Raw(raw) => SemanticOutput::text(raw),
        };

        Ok(create_enhanced_output(
            output,
            EnrichContext {
                session_id: Some(id.to_string()),
                command: Some(cmd.to_string()),
                duration_ms: Some(duration_ms),
                exit_code: None,
            },
        ))
    }

    /// Send a message (text + carriage return) to a session.
    pub async fn send(&self, id: &str, msg: &str) -> Result<()> {
        let managed = self.get(id).await?;
        managed.touch();
        managed.driver.send(msg).await
    }

    /// Write raw bytes to a session.
    pub async fn write(&self, id: &str, bytes: &[u8]) -> Result<()> {
        let managed = self.get(id).await?;
        managed.touch();
        managed.driver.write(bytes).await
    }

    /// Send Ctrl-C to a session.
    pub async fn interrupt(&self, id: &str) -> Result<()> {
        let managed = self.get(id).await?;
        managed.touch();
        managed.driver.interrupt().await
    }

    /// Screen text, optionally only the last `lines` lines.
    pub async fn get_screen(&self, id: &str, lines: Option<usize>) -> Result<String> {
        let managed = self.get(id).await?;
        Ok(match lines {
            Some(n) => managed.driver.last_lines(n).await.join("\n"),
            None => managed.driver.screen_text().await,
        })
    }

    /// Current state of a session.
    pub async fn get_state(&self, id: &str) -> Result<SessionState> {
        let managed = self.get(id).await?;
        Ok(managed.driver.state().await)
    }

    /// Wait for a session to enter a state.
    pub async fn wait_for_state(
        &self,
        id: &str,
        state: SessionState,
        wait: Duration,
    ) -> Result<()> {
        let managed = self.get(id).await?;
        managed.driver.wait_for_state(state, wait).await
    }

    /// The pending confirmation of a session, if any.
    pub async fn get_pending_confirm(&self, id: &str) -> Result<Option<ConfirmInfo>> {
        let managed = self.get(id).await?;
        Ok(managed.driver.pending_confirm().await)
    }

    /// Answer a session's pending confirmation.
    pub async fn respond_to_confirm(&self, id: &str, response: &ConfirmResponse) -> Result<()> {
        let managed = self.get(id).await?;
        managed.touch();
        managed.driver.confirm(response).await
    }
}

/// Globally unique session id: `session-<timestamp36>-<random6>`.
fn generate_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(6)
        .collect();
    format!("session-{}-{}", to_base36(millis as u64), random)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).expect("base36 digits are ascii")
}
