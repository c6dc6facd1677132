//! One shell per socket: PTY plumbing and the frame handling around it.

use agentos_core::term_wire::{decode_client_frame, ClientFrame, ServerFrame};
use agentos_core::utf8::Utf8Carry;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{self, Read, Write};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Program and arguments started for every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
}

impl ShellCommand {
    pub fn login(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: vec!["-l".to_string()],
            cwd: std::env::var("HOME").ok().filter(|home| !home.trim().is_empty()),
        }
    }
}

/// What an inbound frame asks of the PTY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyOp {
    Write(Vec<u8>),
    Resize { cols: u16, rows: u16 },
}

pub fn frame_op(text: &str) -> Option<PtyOp> {
    match decode_client_frame(text) {
        Ok(ClientFrame::Input { data }) | Ok(ClientFrame::Command { data }) => {
            Some(PtyOp::Write(data.into_bytes()))
        }
        Ok(ClientFrame::Resize { cols, rows }) => Some(PtyOp::Resize {
            cols: cols.max(1),
            rows: rows.max(1),
        }),
        Err(err) => {
            debug!(event = "frame_rejected", error = %err);
            None
        }
    }
}

pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
}

fn pty_error(err: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

impl PtySession {
    /// Starts `shell` in a fresh PTY. Output and the final exit status are
    /// pushed to `frames` from a blocking reader task.
    pub fn spawn(shell: &ShellCommand, frames: mpsc::UnboundedSender<ServerFrame>) -> io::Result<Self> {
        let pair = native_pty_system()
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(pty_error)?;

        let mut builder = CommandBuilder::new(&shell.program);
        builder.args(&shell.args);
        builder.env("TERM", "xterm-256color");
        if let Some(cwd) = &shell.cwd {
            builder.cwd(cwd);
        }
        let mut child = pair.slave.spawn_command(builder).map_err(pty_error)?;
        drop(pair.slave);
        let killer = child.clone_killer();
        let pid = child.process_id();

        let mut reader = pair.master.try_clone_reader().map_err(pty_error)?;
        let writer = pair.master.take_writer().map_err(pty_error)?;

        tokio::task::spawn_blocking(move || {
            let mut buffer = [0u8; 8192];
            let mut carry = Utf8Carry::default();
            loop {
                let read = match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => count,
                    Err(_) => break,
                };
                let data = carry.push(&buffer[..read]);
                if data.is_empty() {
                    continue;
                }
                if frames.send(ServerFrame::Output { data }).is_err() {
                    break;
                }
            }
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(err) => {
                    warn!(event = "child_wait_error", error = %err);
                    None
                }
            };
            info!(event = "shell_exit", pid = ?pid, code = ?code);
            let _ = frames.send(ServerFrame::Exit { code });
        });

        info!(event = "shell_spawned", program = %shell.program, pid = ?pid);
        Ok(Self {
            master: pair.master,
            writer,
            killer,
        })
    }

    pub fn apply(&mut self, op: PtyOp) -> io::Result<()> {
        match op {
            PtyOp::Write(bytes) => {
                self.writer.write_all(&bytes)?;
                self.writer.flush()
            }
            PtyOp::Resize { cols, rows } => self
                .master
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(pty_error),
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = self.killer.kill();
    }
}
