use async_trait::async_trait;
use russh::{client::Msg, Channel, ChannelMsg};
use tracing::trace;

use crate::{
    error::{Error, Result},
    session::{PtyRequest, RemoteSession, SessionEvent, SessionInput},
};

/// Standard error travels as extended data of this type.
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

pub(crate) struct ChannelSession {
    channel: Channel<Msg>,
}

impl ChannelSession {
    pub(crate) fn new(channel: Channel<Msg>) -> ChannelSession {
        ChannelSession { channel }
    }

    async fn await_reply(&mut self, request: &'static str) -> Result<()> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Success) => return Ok(()),
                Some(ChannelMsg::Failure) => return Err(Error::RequestRejected { request }),
                Some(ChannelMsg::Close) | None => return Err(Error::Session(russh::Error::Disconnect)),
                Some(other) => trace!(request, message = ?other, "message while awaiting reply"),
            }
        }
    }
}

#[async_trait]
impl RemoteSession for ChannelSession {
    async fn set_env(&mut self, name: &str, value: &str) -> Result<()> {
        self.channel
            .set_env(true, name, value)
            .await
            .map_err(Error::Session)?;
        self.await_reply("env").await
    }

    async fn request_pty(&mut self, request: &PtyRequest) -> Result<()> {
        self.channel
            .request_pty(
                true,
                &request.term,
                request.col_width,
                request.row_height,
                0,
                0,
                &request.terminal_modes,
            )
            .await
            .map_err(Error::Session)?;
        self.await_reply("pty-req").await
    }

    async fn exec(&mut self, command: &str) -> Result<()> {
        self.channel.exec(true, command).await.map_err(Error::Session)
    }

    async fn request_shell(&mut self) -> Result<()> {
        self.channel.request_shell(true).await.map_err(Error::Session)
    }

    fn input(&self) -> SessionInput {
        Box::new(Box::pin(self.channel.make_writer()))
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let event = match self.channel.wait().await? {
                ChannelMsg::Data { data } => SessionEvent::Stdout(data.to_vec()),
                ChannelMsg::ExtendedData { data, ext } if ext == SSH_EXTENDED_DATA_STDERR => {
                    SessionEvent::Stderr(data.to_vec())
                }
                ChannelMsg::ExtendedData { data, ext } => SessionEvent::ExtendedData {
                    ext,
                    data: data.to_vec(),
                },
                ChannelMsg::ExitStatus { exit_status } => SessionEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => SessionEvent::ExitSignal(format!("{signal_name:?}")),
                ChannelMsg::Failure => SessionEvent::RequestFailed,
                ChannelMsg::Eof => SessionEvent::Eof,
                ChannelMsg::Close => return None,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.channel.close().await.map_err(Error::Session)
    }
}
