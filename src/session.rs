use async_trait::async_trait;
use russh::Pty;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{Error, Result};

pub type SessionInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type StreamSource = Box<dyn AsyncRead + Send + Unpin>;
pub type StreamSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Something that can happen on an open session after exec or shell was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    ExtendedData { ext: u32, data: Vec<u8> },
    ExitStatus(u32),
    ExitSignal(String),
    /// A pending exec/shell request was refused.
    RequestFailed,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyRequest {
    pub term: String,
    pub col_width: u32,
    pub row_height: u32,
    pub terminal_modes: Vec<(Pty, u32)>,
}

/// One logical execution context multiplexed over the transport.
#[async_trait]
pub trait RemoteSession: Send {
    /// Sends an environment assignment and waits for the server to accept it.
    async fn set_env(&mut self, name: &str, value: &str) -> Result<()>;

    async fn request_pty(&mut self, request: &PtyRequest) -> Result<()>;

    async fn exec(&mut self, command: &str) -> Result<()>;

    async fn request_shell(&mut self) -> Result<()>;

    /// A writer feeding the remote standard input. Shutting it down sends EOF.
    fn input(&self) -> SessionInput;

    /// The next event, or `None` once the session is closed.
    async fn next_event(&mut self) -> Option<SessionEvent>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SessionOpener: Send + Sync {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>>;
}

/// How a remote process ended, as seen from its session.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub status: Option<u32>,
    pub signal: Option<String>,
    pub request_failed: bool,
    /// First failure writing to an output sink.
    pub stream_error: Option<String>,
}

impl ExitOutcome {
    pub fn into_command_error(self) -> Error {
        Error::Command {
            status: self.status,
            signal: self.signal,
        }
    }
}

struct Sink {
    writer: Option<StreamSink>,
    failed: bool,
}

impl Sink {
    fn new(writer: Option<StreamSink>) -> Sink {
        Sink { writer, failed: false }
    }

    async fn write(&mut self, data: &[u8], outcome: &mut ExitOutcome) {
        if self.failed {
            return;
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(err) = writer.write_all(data).await {
            self.record(err, outcome);
        }
    }

    async fn flush(&mut self, outcome: &mut ExitOutcome) {
        if self.failed {
            return;
        }
        if let Some(writer) = self.writer.as_mut() {
            if let Err(err) = writer.flush().await {
                self.record(err, outcome);
            }
        }
    }

    fn record(&mut self, err: std::io::Error, outcome: &mut ExitOutcome) {
        warn!(error = %err, "output sink failed, discarding the rest of its stream");
        self.failed = true;
        outcome.stream_error.get_or_insert_with(|| err.to_string());
    }
}

/// Drains session events into the sinks until the session closes, then flushes them.
///
/// Every chunk delivered before the close is written before this returns.
pub(crate) async fn pump_session(
    session: &mut dyn RemoteSession,
    stdout: Option<StreamSink>,
    stderr: Option<StreamSink>,
) -> ExitOutcome {
    let mut outcome = ExitOutcome::default();
    let mut stdout = Sink::new(stdout);
    let mut stderr = Sink::new(stderr);

    while let Some(event) = session.next_event().await {
        match event {
            SessionEvent::Stdout(data) => stdout.write(&data, &mut outcome).await,
            SessionEvent::Stderr(data) => stderr.write(&data, &mut outcome).await,
            SessionEvent::ExtendedData { ext, data } => {
                debug!(ext, len = data.len(), "ignoring extended data");
            }
            SessionEvent::ExitStatus(status) => outcome.status = Some(status),
            SessionEvent::ExitSignal(signal) => outcome.signal = Some(signal),
            SessionEvent::RequestFailed => {
                outcome.request_failed = true;
            }
            SessionEvent::Eof => {}
        }
    }

    stdout.flush(&mut outcome).await;
    stderr.flush(&mut outcome).await;
    outcome
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    struct Replay(VecDeque<SessionEvent>);

    #[async_trait]
    impl RemoteSession for Replay {
        async fn set_env(&mut self, _name: &str, _value: &str) -> Result<()> {
            Ok(())
        }
        async fn request_pty(&mut self, _request: &PtyRequest) -> Result<()> {
            Ok(())
        }
        async fn exec(&mut self, _command: &str) -> Result<()> {
            Ok(())
        }
        async fn request_shell(&mut self) -> Result<()> {
            Ok(())
        }
        fn input(&self) -> SessionInput {
            Box::new(tokio::io::sink())
        }
        async fn next_event(&mut self) -> Option<SessionEvent> {
            self.0.pop_front()
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn pump_routes_streams_and_records_exit() {
        let mut session = Replay(VecDeque::from([
            SessionEvent::Stdout(b"out".to_vec()),
            SessionEvent::Stderr(b"err".to_vec()),
            SessionEvent::ExtendedData {
                ext: 7,
                data: b"ignored".to_vec(),
            },
            SessionEvent::Eof,
            SessionEvent::ExitStatus(3),
        ]));
        let (stdout, mut stdout_rx) = tokio::io::duplex(64);
        let (stderr, mut stderr_rx) = tokio::io::duplex(64);

        let outcome = pump_session(&mut session, Some(Box::new(stdout)), Some(Box::new(stderr))).await;

        assert_eq!(outcome.status, Some(3));
        assert_eq!(outcome.stream_error, None);
        let mut buf = [0u8; 3];
        tokio::io::AsyncReadExt::read_exact(&mut stdout_rx, &mut buf).await.unwrap();
        assert_eq!(&buf, b"out");
        tokio::io::AsyncReadExt::read_exact(&mut stderr_rx, &mut buf).await.unwrap();
        assert_eq!(&buf, b"err");
    }

    #[tokio::test]
    async fn pump_keeps_draining_after_sink_failure() {
        let mut session = Replay(VecDeque::from([
            SessionEvent::Stdout(b"first".to_vec()),
            SessionEvent::Stdout(b"second".to_vec()),
            SessionEvent::ExitStatus(0),
        ]));
        let (stdout, stdout_rx) = tokio::io::duplex(64);
        drop(stdout_rx);

        let outcome = pump_session(&mut session, Some(Box::new(stdout)), None).await;

        assert_eq!(outcome.status, Some(0));
        assert!(outcome.stream_error.is_some());
        assert!(session.0.is_empty());
    }
}
