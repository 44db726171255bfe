use std::{fmt, path::Path, sync::Arc};

use russh_keys::key::KeyPair;

use crate::error::{Error, Result};

pub enum AuthMethod {
    Password { password: String },
    PublicKey { key_pair: Arc<KeyPair> },
    None,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password { .. } => f.write_str("Password"),
            AuthMethod::PublicKey { .. } => f.write_str("PublicKey"),
            AuthMethod::None => f.write_str("None"),
        }
    }
}

/// Proof-of-identity methods, offered to the server in order until one is accepted.
#[derive(Debug)]
pub struct Authenticator {
    methods: Vec<AuthMethod>,
}

impl Authenticator {
    pub fn password(password: impl Into<String>) -> Authenticator {
        Authenticator {
            methods: vec![AuthMethod::Password {
                password: password.into(),
            }],
        }
    }

    pub fn key_pair(key_pair: KeyPair) -> Authenticator {
        Authenticator {
            methods: vec![AuthMethod::PublicKey {
                key_pair: Arc::new(key_pair),
            }],
        }
    }

    pub fn none() -> Authenticator {
        Authenticator {
            methods: vec![AuthMethod::None],
        }
    }

    /// Loads a private key file, decrypting it with `passphrase` when one is given.
    pub fn key_file(path: impl AsRef<Path>, passphrase: Option<&str>) -> Result<Authenticator> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|source| Error::KeyRead {
            path: path.to_path_buf(),
            source,
        })?;
        Authenticator::key_pem(&pem, passphrase)
    }

    pub fn key_pem(pem: &str, passphrase: Option<&str>) -> Result<Authenticator> {
        let passphrase = passphrase.filter(|p| !p.is_empty());
        let key_pair = russh_keys::decode_secret_key(pem, passphrase).map_err(Error::KeyParse)?;
        Ok(Authenticator::key_pair(key_pair))
    }

    /// Adds a method to try after the existing ones.
    pub fn or(mut self, method: AuthMethod) -> Authenticator {
        self.methods.push(method);
        self
    }

    pub fn methods(&self) -> &[AuthMethod] {
        &self.methods
    }
}
