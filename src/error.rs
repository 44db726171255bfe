use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Errors produced by connection setup, sessions and transfers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not establish SSH transport: {0}")]
    Dial(#[source] russh::Error),

    #[error("SSH transport was not established within {0:?}")]
    DialTimeout(Duration),

    #[error("server rejected every authentication method for user '{user}'")]
    AuthenticationRejected { user: String },

    #[error("could not start SFTP subsystem: {0}")]
    Subsystem(#[source] SubsystemError),

    #[error("session failure: {0}")]
    Session(#[source] russh::Error),

    #[error("server rejected {request} request")]
    RequestRejected { request: &'static str },

    #[error("remote command failed{}", describe_exit(.status, .signal))]
    Command {
        status: Option<u32>,
        signal: Option<String>,
    },

    #[error("could not copy command stream: {0}")]
    Stream(#[source] io::Error),

    #[error("transfer of '{path}' failed: {source}")]
    Transfer {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{} entries failed to transfer", .failures.len())]
    PartialTransfer { failures: Vec<TransferFailure> },

    #[error("could not create directory '{path}': {source}")]
    Directory {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not read private key '{}': {source}", .path.display())]
    KeyRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse private key: {0}")]
    KeyParse(#[source] russh_keys::Error),

    #[error("could not generate key pair: {0}")]
    KeyGeneration(String),

    #[error("could not access key pair file '{}': {source}", .path.display())]
    KeyPairIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("local terminal failure: {0}")]
    Terminal(#[source] TerminalError),

    #[error("connection is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum SubsystemError {
    #[error(transparent)]
    Channel(#[from] russh::Error),
    #[error(transparent)]
    Sftp(#[from] russh_sftp::client::error::Error),
}

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("raw mode is already held by another shell")]
    RawModeBusy,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One child of a recursive transfer that did not make it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    pub path: String,
    pub message: String,
}

impl TransferFailure {
    pub(crate) fn new(path: impl Into<String>, error: &Error) -> Self {
        TransferFailure {
            path: path.into(),
            message: error.to_string(),
        }
    }
}

impl Error {
    /// Whether the remote side ran the command and it exited unsuccessfully.
    pub fn is_exit_error(&self) -> bool {
        matches!(self, Error::Command { .. })
    }

    pub fn exit_status(&self) -> Option<u32> {
        match self {
            Error::Command { status, .. } => *status,
            _ => None,
        }
    }

    pub(crate) fn transfer(path: impl Into<String>, source: io::Error) -> Self {
        Error::Transfer {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn directory(path: impl Into<String>, source: io::Error) -> Self {
        Error::Directory {
            path: path.into(),
            source,
        }
    }
}

impl From<TerminalError> for Error {
    fn from(err: TerminalError) -> Self {
        Error::Terminal(err)
    }
}

fn describe_exit(status: &Option<u32>, signal: &Option<String>) -> String {
    match (status, signal) {
        (_, Some(signal)) => format!(" (killed by signal {signal})"),
        (Some(status), None) => format!(" with exit status {status}"),
        (None, None) => " without reporting an exit status".into(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
