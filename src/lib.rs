pub mod auth;
pub mod connection;
pub mod directory;
pub mod error;
pub mod executor;
pub mod filesystem;
pub mod native;
pub mod session;
pub mod shell;
pub mod terminal;
pub mod transfer;

#[cfg(feature = "keygen")]
pub mod keys;

pub use auth::{AuthMethod, Authenticator};
pub use connection::{ConnectOptions, Connection, HostKeyPolicy};
pub use error::{Error, Result};
pub use executor::Command;
pub use shell::{ShellIo, ShellOptions};
pub use transfer::{ChildErrorPolicy, TransferOptions};
