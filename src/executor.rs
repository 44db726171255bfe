use std::{fmt, io};

use tokio::{io::AsyncWriteExt, task::JoinHandle};
use tracing::{debug, trace, warn};

use crate::{
    error::{Error, Result},
    session::{pump_session, RemoteSession, SessionInput, SessionOpener, StreamSink, StreamSource},
};

const LOGIN_SHELL_PREFIX: &str = "source ~/.profile && ";

/// A non-interactive remote command together with its environment and stream wiring.
pub struct Command {
    pub(crate) command_line: String,
    pub(crate) envs: Vec<String>,
    pub(crate) stdin: Option<StreamSource>,
    pub(crate) stdout: Option<StreamSink>,
    pub(crate) stderr: Option<StreamSink>,
    pub(crate) login_shell_environment: bool,
}

impl Command {
    pub fn new(command_line: impl Into<String>) -> Command {
        Command {
            command_line: command_line.into(),
            envs: Vec::new(),
            stdin: None,
            stdout: None,
            stderr: None,
            login_shell_environment: false,
        }
    }

    /// Adds a `KEY=VALUE` assignment. Malformed assignments are skipped at run time.
    pub fn env(&mut self, assignment: impl Into<String>) -> &mut Self {
        self.envs.push(assignment.into());
        self
    }

    pub fn envs<I, S>(&mut self, assignments: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.envs.extend(assignments.into_iter().map(Into::into));
        self
    }

    pub fn stdin(&mut self, source: impl tokio::io::AsyncRead + Send + Unpin + 'static) -> &mut Self {
        self.stdin = Some(Box::new(source));
        self
    }

    pub fn stdout(&mut self, sink: impl tokio::io::AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stdout = Some(Box::new(sink));
        self
    }

    pub fn stderr(&mut self, sink: impl tokio::io::AsyncWrite + Send + Unpin + 'static) -> &mut Self {
        self.stderr = Some(Box::new(sink));
        self
    }

    /// Sources `~/.profile` before running the command line.
    pub fn login_shell_environment(&mut self, enabled: bool) -> &mut Self {
        self.login_shell_environment = enabled;
        self
    }

    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// The text sent to the server in the exec request.
    pub fn effective_command_line(&self) -> String {
        if self.login_shell_environment {
            format!("{LOGIN_SHELL_PREFIX}{}", self.command_line)
        } else {
            self.command_line.clone()
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("command_line", &self.command_line)
            .field("envs", &self.envs)
            .field("stdin", &self.stdin.is_some())
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("login_shell_environment", &self.login_shell_environment)
            .finish()
    }
}

/// Splits `KEY=VALUE`. Anything without exactly one `=` yields `None`.
pub fn parse_env_assignment(assignment: &str) -> Option<(&str, &str)> {
    let mut parts = assignment.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Some((key, value)),
        _ => None,
    }
}

/// Runs `command` in a fresh session and waits for it to finish.
///
/// Output sinks receive everything the command wrote before it exited. A non-zero exit
/// status or a terminating signal is reported as [`Error::Command`]. The session is
/// closed on every path.
pub async fn run<O>(opener: &O, command: Command) -> Result<()>
where
    O: SessionOpener + ?Sized,
{
    let mut session = opener.open_session().await?;
    let result = run_in_session(session.as_mut(), command).await;
    if let Err(err) = session.close().await {
        debug!(error = %err, "session close after command failed");
    }
    result
}

async fn run_in_session(session: &mut dyn RemoteSession, command: Command) -> Result<()> {
    let command_line = command.effective_command_line();
    let Command {
        envs, stdin, stdout, stderr, ..
    } = command;

    for assignment in &envs {
        match parse_env_assignment(assignment) {
            Some((key, value)) => session.set_env(key, value).await?,
            None => trace!(assignment = %assignment, "skipping malformed environment assignment"),
        }
    }

    session.exec(&command_line).await?;
    debug!(command = %command_line, "remote command started");

    let stdin_task = stdin.map(|source| spawn_stdin_copy(source, session.input()));
    let outcome = pump_session(session, stdout, stderr).await;
    let stdin_error = finish_stdin_copy(stdin_task).await;

    if outcome.request_failed {
        return Err(Error::RequestRejected { request: "exec" });
    }

    if outcome.status != Some(0) || outcome.signal.is_some() {
        if let Some(err) = &stdin_error {
            warn!(error = %err, "stdin copy failed for a command that also failed");
        }
        return Err(outcome.into_command_error());
    }

    if let Some(message) = outcome.stream_error {
        return Err(Error::Stream(io::Error::other(message)));
    }
    if let Some(err) = stdin_error {
        return Err(Error::Stream(err));
    }

    debug!(command = %command_line, "remote command finished");
    Ok(())
}

pub(crate) fn spawn_stdin_copy(
    mut source: StreamSource,
    mut input: SessionInput,
) -> JoinHandle<io::Result<u64>> {
    tokio::spawn(async move {
        let copied = tokio::io::copy(&mut source, &mut input).await?;
        input.shutdown().await?;
        Ok(copied)
    })
}

/// Joins a finished stdin copy, or cancels one that is still waiting on its source.
pub(crate) async fn finish_stdin_copy(task: Option<JoinHandle<io::Result<u64>>>) -> Option<io::Error> {
    let task = task?;
    if !task.is_finished() {
        task.abort();
        return None;
    }
    match task.await {
        Ok(Ok(copied)) => {
            trace!(copied, "stdin copy completed");
            None
        }
        Ok(Err(err)) => Some(err),
        Err(join_error) => Some(io::Error::other(join_error)),
    }
}
