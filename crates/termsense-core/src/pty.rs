//! PTY transport: spawns the child process behind a pseudo-terminal.
//!
//! The login-shell wrapping lives here: a command is run as
//! `$SHELL -l -c "cmd args…"`, no command means a bare interactive
//! `$SHELL -l`. Reads happen on a blocking thread owned by the driver.

use std::collections::HashMap;
use std::io::{Read, Write};

use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Options for spawning a PTY child.
#[derive(Debug, Clone)]
pub struct PtyOptions {
    /// Command to run inside the login shell; `None` = interactive shell
    pub command: Option<String>,
    /// Arguments appended to the command
    pub args: Vec<String>,
    /// Terminal columns
    pub cols: u16,
    /// Terminal rows
    pub rows: u16,
    /// Working directory
    pub cwd: Option<String>,
    /// Extra environment variables (the parent environment is inherited)
    pub env: HashMap<String, String>,
}

impl Default for PtyOptions {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            cols: 120,
            rows: 30,
            cwd: None,
            env: HashMap::new(),
        }
    }
}

/// A spawned PTY child process.
pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    child: Option<Box<dyn Child + Send + Sync>>,
    writer: Box<dyn Write + Send>,
    pid: Option<u32>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Spawn a child behind a new PTY.
    pub fn spawn(options: &PtyOptions) -> Result<Self> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: options.rows,
                cols: options.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(format!("openpty failed: {e}")))?;

        let shell = default_shell();
        let mut cmd = CommandBuilder::new(&shell);
        match &options.command {
            Some(command) => {
                let mut full = command.clone();
                for arg in &options.args {
                    full.push(' ');
                    full.push_str(arg);
                }
                info!(shell = %shell, command = %full, "spawning command via login shell");
                cmd.args(["-l", "-c", &full]);
            }
            None => {
                info!(shell = %shell, "spawning interactive login shell");
                cmd.arg("-l");
            }
        }

        if let Some(cwd) = &options.cwd {
            cmd.cwd(cwd);
        }

        // CommandBuilder starts with an empty environment; inherit the
        // parent's, then apply overrides.
        for (key, value) in std::env::vars() {
            cmd.env(key, value);
        }
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(e.to_string()))?;
        let pid = child.process_id();
        debug!(pid = ?pid, "PTY child spawned");

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(format!("take_writer failed: {e}")))?;

        Ok(Self {
            master: pair.master,
            child: Some(child),
            writer,
            pid,
        })
    }

    /// Child process id, when the platform reports one.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// A reader over the master end, for a dedicated blocking read loop.
    pub fn take_reader(&self) -> Result<Box<dyn Read + Send>> {
        self.master
            .try_clone_reader()
            .map_err(|e| Error::Pty(format!("clone_reader failed: {e}")))
    }

    /// Write bytes to the child's input.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Resize the PTY; the child receives SIGWINCH.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Pty(format!("resize failed: {e}")))
    }

    /// Whether the child is still running. Always false once the child
    /// has been handed to an exit watcher via [`PtyProcess::take_child`].
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    /// Block until the child exits; returns its exit code.
    pub fn wait(&mut self) -> Result<i32> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::Pty("child already taken".into()))?;
        let status = child
            .wait()
            .map_err(|e| Error::Pty(format!("wait failed: {e}")))?;
        Ok(status.exit_code() as i32)
    }

    /// A killer handle that stays valid after the child is taken.
    pub fn clone_killer(&self) -> Option<Box<dyn ChildKiller + Send + Sync>> {
        self.child.as_ref().map(|c| c.clone_killer())
    }

    /// Move the child out for a dedicated exit watcher. Clone a killer
    /// first if the caller still needs to terminate the process.
    pub fn take_child(&mut self) -> Option<Box<dyn Child + Send + Sync>> {
        self.child.take()
    }

    /// Kill the child process.
    pub fn kill(&mut self) -> Result<()> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| Error::Pty("child already taken".into()))?;
        child
            .kill()
            .map_err(|e| Error::Pty(format!("kill failed: {e}")))
    }
}

fn default_shell() -> String {
    if cfg!(windows) {
        "powershell.exe".to_string()
    } else {
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_spawn_interactive_shell() {
        let pty = PtyProcess::spawn(&PtyOptions::default());
        assert!(pty.is_ok());
        let mut pty = pty.unwrap();
        assert!(pty.is_alive());
        pty.kill().unwrap();
    }

    #[test]
    fn test_spawn_command_and_read_output() {
        let mut pty = PtyProcess::spawn(&PtyOptions {
            command: Some("echo".into()),
            args: vec!["pty-works".into()],
            ..PtyOptions::default()
        })
        .unwrap();

        let mut reader = pty.take_reader().unwrap();
        let mut collected = Vec::new();
        let mut buf = [0u8; 4096];
        // The command exits on its own; read until EOF or the marker shows.
        for _ in 0..50 {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    collected.extend_from_slice(&buf[..n]);
                    if String::from_utf8_lossy(&collected).contains("pty-works") {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        assert!(String::from_utf8_lossy(&collected).contains("pty-works"));
        let _ = pty.kill();
    }

    #[test]
    fn test_write_reaches_child() {
        let mut pty = PtyProcess::spawn(&PtyOptions::default()).unwrap();
        assert!(pty.write(b"echo hi\r").is_ok());
        std::thread::sleep(Duration::from_millis(100));
        pty.kill().unwrap();
    }

    #[test]
    fn test_kill_terminates_child() {
        let mut pty = PtyProcess::spawn(&PtyOptions::default()).unwrap();
        assert!(pty.is_alive());
        pty.kill().unwrap();
        std::thread::sleep(Duration::from_millis(200));
        assert!(!pty.is_alive());
    }

    #[test]
    fn test_resize() {
        let mut pty = PtyProcess::spawn(&PtyOptions::default()).unwrap();
        assert!(pty.resize(100, 40).is_ok());
        pty.kill().unwrap();
    }
}
