use std::{fmt, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use russh::client;
use russh_keys::key::PublicKey;
use tracing::{debug, warn};

/// What the host key callback gets to look at.
pub struct HostKeyCheck<'a> {
    pub host: &'a str,
    pub port: u16,
    pub key: &'a PublicKey,
}

pub type HostKeyCallback = Arc<dyn Fn(&HostKeyCheck<'_>) -> bool + Send + Sync>;

/// How the server's host key is verified during the handshake.
#[derive(Clone, Default)]
pub enum HostKeyPolicy {
    /// Trust whatever key the server presents.
    #[default]
    AcceptAny,
    /// Accept only a key whose SHA-256 fingerprint matches, with or without the `SHA256:` prefix.
    Fingerprint(String),
    /// Look the host up in an OpenSSH `known_hosts` file.
    KnownHostsFile(PathBuf),
    Callback(HostKeyCallback),
}

impl HostKeyPolicy {
    pub fn callback(callback: impl Fn(&HostKeyCheck<'_>) -> bool + Send + Sync + 'static) -> HostKeyPolicy {
        HostKeyPolicy::Callback(Arc::new(callback))
    }

    pub(crate) fn verify(&self, check: &HostKeyCheck<'_>) -> bool {
        match self {
            HostKeyPolicy::AcceptAny => true,
            HostKeyPolicy::Fingerprint(expected) => {
                let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
                check.key.fingerprint() == expected
            }
            HostKeyPolicy::KnownHostsFile(path) => {
                match russh_keys::check_known_hosts_path(check.host, check.port, check.key, path) {
                    Ok(known) => known,
                    Err(err) => {
                        warn!(host = check.host, error = %err, "known hosts lookup failed");
                        false
                    }
                }
            }
            HostKeyPolicy::Callback(callback) => callback(check),
        }
    }
}

impl fmt::Debug for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => f.write_str("AcceptAny"),
            HostKeyPolicy::Fingerprint(fingerprint) => f.debug_tuple("Fingerprint").field(fingerprint).finish(),
            HostKeyPolicy::KnownHostsFile(path) => f.debug_tuple("KnownHostsFile").field(path).finish(),
            HostKeyPolicy::Callback(_) => f.write_str("Callback"),
        }
    }
}

pub(crate) struct HostKeyVerifier {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl HostKeyVerifier {
    pub(crate) fn new(host: String, port: u16, policy: HostKeyPolicy) -> HostKeyVerifier {
        HostKeyVerifier { host, port, policy }
    }
}

#[async_trait]
impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        let accepted = self.policy.verify(&HostKeyCheck {
            host: &self.host,
            port: self.port,
            key: server_public_key,
        });
        debug!(
            host = %self.host,
            fingerprint = %server_public_key.fingerprint(),
            accepted,
            "checked server host key"
        );
        Ok(accepted)
    }
}
