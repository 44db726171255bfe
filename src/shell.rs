use russh::Pty;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    executor::{finish_stdin_copy, spawn_stdin_copy},
    session::{pump_session, PtyRequest, RemoteSession, SessionOpener, StreamSink, StreamSource},
    terminal::LocalTerminal,
};

pub const DEFAULT_TERM: &str = "xterm-256color";

/// Remote exit status treated as a normal end of an interactive shell.
pub const INTERRUPTED_EXIT_STATUS: u32 = 130;

const TERMINAL_SPEED: u32 = 14400;

#[derive(Debug, Clone, Default)]
pub struct ShellOptions {
    /// Terminal type announced to the server. Falls back to `$TERM`, then [`DEFAULT_TERM`].
    pub term: Option<String>,
}

impl ShellOptions {
    pub fn term(&mut self, term: impl Into<String>) -> &mut Self {
        self.term = Some(term.into());
        self
    }

    pub fn resolve_term(&self) -> String {
        self.term
            .clone()
            .or_else(|| std::env::var("TERM").ok())
            .filter(|term| !term.is_empty())
            .unwrap_or_else(|| DEFAULT_TERM.into())
    }
}

/// The local streams bridged to the remote shell.
pub struct ShellIo {
    pub stdin: StreamSource,
    pub stdout: StreamSink,
    pub stderr: StreamSink,
}

impl ShellIo {
    /// The standard streams of the current process.
    ///
    /// Tokio reads stdin on a blocking thread that cannot be interrupted. When the remote
    /// shell exits while that read is pending, the bridge is aborted but the read stays
    /// parked, so the next local keystroke is consumed and dropped. Pass a cancellable
    /// source in [`ShellIo::stdin`] if that keystroke matters.
    pub fn process() -> ShellIo {
        ShellIo {
            stdin: Box::new(tokio::io::stdin()),
            stdout: Box::new(tokio::io::stdout()),
            stderr: Box::new(tokio::io::stderr()),
        }
    }
}

pub fn terminal_modes() -> Vec<(Pty, u32)> {
    vec![
        (Pty::ECHO, 1),
        (Pty::TTY_OP_ISPEED, TERMINAL_SPEED),
        (Pty::TTY_OP_OSPEED, TERMINAL_SPEED),
    ]
}

/// Opens a login shell on a remote PTY and bridges it to `io` until it exits.
///
/// The local terminal stays in raw mode for the duration of the call. Exit status
/// 0 and [`INTERRUPTED_EXIT_STATUS`] both count as success.
pub async fn shell<O>(opener: &O, terminal: &dyn LocalTerminal, io: ShellIo, options: &ShellOptions) -> Result<()>
where
    O: SessionOpener + ?Sized,
{
    let mut session = opener.open_session().await?;
    let result = shell_in_session(session.as_mut(), terminal, io, options).await;
    if let Err(err) = session.close().await {
        debug!(error = %err, "session close after shell failed");
    }
    result
}

async fn shell_in_session(
    session: &mut dyn RemoteSession,
    terminal: &dyn LocalTerminal,
    io: ShellIo,
    options: &ShellOptions,
) -> Result<()> {
    let _raw_mode = terminal.enter_raw_mode()?;
    let (col_width, row_height) = terminal.size()?;

    let request = PtyRequest {
        term: options.resolve_term(),
        col_width: col_width.into(),
        row_height: row_height.into(),
        terminal_modes: terminal_modes(),
    };
    session.request_pty(&request).await?;
    session.request_shell().await?;
    debug!(term = %request.term, col_width, row_height, "remote shell started");

    let ShellIo { stdin, stdout, stderr } = io;
    let stdin_task = spawn_stdin_copy(stdin, session.input());
    let outcome = pump_session(session, Some(stdout), Some(stderr)).await;
    if let Some(err) = finish_stdin_copy(Some(stdin_task)).await {
        warn!(error = %err, "stdin bridge to remote shell failed");
    }

    if outcome.request_failed {
        return Err(Error::RequestRejected { request: "shell" });
    }

    match (outcome.status, outcome.signal.as_ref()) {
        (Some(0), None) | (Some(INTERRUPTED_EXIT_STATUS), None) => {
            debug!(status = ?outcome.status, "remote shell exited");
            Ok(())
        }
        _ => Err(outcome.into_command_error()),
    }
}
