mod channel;
mod handler;
mod sftp;

use std::{path::Path, sync::Arc, time::Duration};

use async_trait::async_trait;
use russh::{client, Disconnect};
use russh_sftp::client::SftpSession;
use tracing::{debug, info};

pub use handler::{HostKeyCallback, HostKeyCheck, HostKeyPolicy};

use self::{channel::ChannelSession, handler::HostKeyVerifier};
use crate::{
    auth::{AuthMethod, Authenticator},
    directory,
    error::{Error, Result, SubsystemError},
    executor::{self, Command},
    filesystem::RemoteFilesystem,
    session::{RemoteSession, SessionOpener},
    shell::{self, ShellIo, ShellOptions},
    terminal::LocalTerminal,
    transfer::{self, TransferOptions},
};

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(20);

pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub authenticator: Authenticator,
    /// Bound on transport setup including authentication. `None` and zero both mean
    /// [`DEFAULT_DIAL_TIMEOUT`].
    pub timeout: Option<Duration>,
    pub host_key_policy: HostKeyPolicy,
    pub config: client::Config,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>, authenticator: Authenticator) -> ConnectOptions {
        ConnectOptions {
            host: host.into(),
            port: DEFAULT_PORT,
            username: username.into(),
            authenticator,
            timeout: None,
            host_key_policy: HostKeyPolicy::default(),
            config: client::Config::default(),
        }
    }

    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn host_key_policy(&mut self, policy: HostKeyPolicy) -> &mut Self {
        self.host_key_policy = policy;
        self
    }

    pub fn config(&mut self, config: client::Config) -> &mut Self {
        self.config = config;
        self
    }

    pub fn effective_timeout(&self) -> Duration {
        match self.timeout {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_DIAL_TIMEOUT,
        }
    }
}

/// One authenticated SSH transport plus the SFTP subsystem running on it.
pub struct Connection {
    host: String,
    port: u16,
    username: String,
    handle: Option<client::Handle<HostKeyVerifier>>,
    sftp: Option<Arc<SftpSession>>,
}

impl Connection {
    /// Dials, verifies the host key, authenticates and starts SFTP.
    ///
    /// If SFTP cannot be started the transport is disconnected before the error is
    /// returned, so a failed connect leaves nothing open.
    pub async fn connect(options: ConnectOptions) -> Result<Connection> {
        let timeout = options.effective_timeout();
        let ConnectOptions {
            host,
            port,
            username,
            authenticator,
            host_key_policy,
            config,
            ..
        } = options;

        let handler = HostKeyVerifier::new(host.clone(), port, host_key_policy);
        let establish = establish_transport(config, &host, port, &username, &authenticator, handler);
        let handle = tokio::time::timeout(timeout, establish)
            .await
            .map_err(|_| Error::DialTimeout(timeout))??;

        let sftp = match start_sftp(&handle).await {
            Ok(sftp) => sftp,
            Err(err) => {
                if let Err(disconnect_err) = disconnect(&handle).await {
                    debug!(error = %disconnect_err, "disconnect after SFTP failure failed");
                }
                return Err(err);
            }
        };

        info!(host = %host, port, user = %username, "connected");
        Ok(Connection {
            host,
            port,
            username,
            handle: Some(handle),
            sftp: Some(Arc::new(sftp)),
        })
    }

    /// Releases the SFTP subsystem and then the transport.
    ///
    /// Both are attempted even if the first fails; the first error is returned. Closing
    /// an already closed connection is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(sftp) = self.sftp.take() {
            if let Err(err) = sftp.close().await {
                first_error.get_or_insert(Error::Subsystem(err.into()));
            }
        }

        if let Some(handle) = self.handle.take() {
            if let Err(err) = disconnect(&handle).await {
                first_error.get_or_insert(Error::Session(err));
            }
        }

        debug!(host = %self.host, port = self.port, "connection closed");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The SFTP subsystem as a shareable filesystem handle.
    pub fn filesystem(&self) -> Result<Arc<dyn RemoteFilesystem>> {
        let sftp = self.sftp.clone().ok_or(Error::Closed)?;
        Ok(sftp as Arc<dyn RemoteFilesystem>)
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        executor::run(self, command).await
    }

    pub async fn shell(&self, terminal: &dyn LocalTerminal, io: ShellIo, options: &ShellOptions) -> Result<()> {
        shell::shell(self, terminal, io, options).await
    }

    pub async fn ensure_remote_dir(&self, path: &str) -> Result<()> {
        let fs = self.filesystem()?;
        directory::ensure_remote_dir(fs.as_ref(), path).await
    }

    pub async fn upload(&self, local_path: impl AsRef<Path>, remote_path: &str) -> Result<()> {
        let fs = self.filesystem()?;
        transfer::upload(fs.as_ref(), local_path.as_ref(), remote_path).await
    }

    pub async fn download_file(&self, remote_path: &str, local_path: impl AsRef<Path>) -> Result<()> {
        let fs = self.filesystem()?;
        transfer::download_file(fs.as_ref(), remote_path, local_path.as_ref()).await
    }

    pub async fn download(&self, remote_dir: &str, local_dir: impl AsRef<Path>, options: &TransferOptions) -> Result<()> {
        transfer::download(self.filesystem()?, remote_dir, local_dir.as_ref(), options).await
    }

    pub async fn upload_dir(&self, local_dir: impl AsRef<Path>, remote_dir: &str, options: &TransferOptions) -> Result<()> {
        transfer::upload_dir(self.filesystem()?, local_dir.as_ref(), remote_dir, options).await
    }

    #[cfg(test)]
    fn detached(host: &str, port: u16, username: &str) -> Connection {
        Connection {
            host: host.into(),
            port,
            username: username.into(),
            handle: None,
            sftp: None,
        }
    }
}

#[async_trait]
impl SessionOpener for Connection {
    async fn open_session(&self) -> Result<Box<dyn RemoteSession>> {
        let handle = self.handle.as_ref().ok_or(Error::Closed)?;
        let channel = handle.channel_open_session().await.map_err(Error::Session)?;
        debug!(channel = ?channel.id(), "session opened");
        Ok(Box::new(ChannelSession::new(channel)))
    }
}

async fn establish_transport(
    config: client::Config,
    host: &str,
    port: u16,
    username: &str,
    authenticator: &Authenticator,
    handler: HostKeyVerifier,
) -> Result<client::Handle<HostKeyVerifier>> {
    let mut handle = client::connect(Arc::new(config), (host, port), handler)
        .await
        .map_err(Error::Dial)?;

    for method in authenticator.methods() {
        let accepted = match method {
            AuthMethod::Password { password } => handle.authenticate_password(username, password).await,
            AuthMethod::PublicKey { key_pair } => handle.authenticate_publickey(username, key_pair.clone()).await,
            AuthMethod::None => handle.authenticate_none(username).await,
        }
        .map_err(Error::Dial)?;

        if accepted {
            debug!(user = %username, method = ?method, "authenticated");
            return Ok(handle);
        }
        debug!(user = %username, method = ?method, "authentication method refused");
    }

    Err(Error::AuthenticationRejected {
        user: username.into(),
    })
}

async fn start_sftp(handle: &client::Handle<HostKeyVerifier>) -> Result<SftpSession> {
    let channel = handle
        .channel_open_session()
        .await
        .map_err(|err| Error::Subsystem(SubsystemError::Channel(err)))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|err| Error::Subsystem(SubsystemError::Channel(err)))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|err| Error::Subsystem(SubsystemError::Sftp(err)))
}

async fn disconnect(handle: &client::Handle<HostKeyVerifier>) -> std::result::Result<(), russh::Error> {
    handle.disconnect(Disconnect::ByApplication, "", "English").await
}
