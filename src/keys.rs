//! Read-or-generate provisioning of an RSA key pair on disk.
//!
//! The private half is stored as PKCS#1 PEM, the public half as an OpenSSH
//! `authorized_keys` line in `<path>.pub`.

use std::{
    fs::{self, OpenOptions, Permissions},
    io::Write,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use rsa::{
    pkcs1::{EncodeRsaPrivateKey, LineEnding},
    RsaPrivateKey,
};
use ssh_key::{public::KeyData, PublicKey};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const RSA_KEY_BITS: usize = 2048;

const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

#[derive(Clone, PartialEq, Eq)]
pub struct KeyPairText {
    /// OpenSSH authorized-key line, newline terminated.
    pub public: String,
    /// PEM encoded `RSA PRIVATE KEY`.
    pub private: String,
}

impl std::fmt::Debug for KeyPairText {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairText")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

pub fn public_key_path(path: &Path) -> PathBuf {
    let mut public = path.as_os_str().to_owned();
    public.push(".pub");
    PathBuf::from(public)
}

/// Returns the pair stored at `path`, generating and persisting a new one if it cannot be read.
pub fn read_or_generate_key_pair(path: impl AsRef<Path>) -> Result<KeyPairText> {
    let path = path.as_ref();
    match read_key_pair(path) {
        Ok(pair) => {
            debug!(path = %path.display(), "using existing key pair");
            return Ok(pair);
        }
        Err(err) => debug!(path = %path.display(), error = %err, "no usable key pair, generating one"),
    }

    let pair = generate_key_pair()?;
    write_key_pair(path, &pair)?;
    info!(path = %path.display(), bits = RSA_KEY_BITS, "generated key pair");
    Ok(pair)
}

pub fn generate_key_pair() -> Result<KeyPairText> {
    let mut rng = rand::thread_rng();
    let private_key =
        RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|err| Error::KeyGeneration(err.to_string()))?;

    let private = private_key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|err| Error::KeyGeneration(err.to_string()))?
        .to_string();

    let public_data = ssh_key::public::RsaPublicKey::try_from(private_key.to_public_key())
        .map_err(|err| Error::KeyGeneration(err.to_string()))?;
    let public = PublicKey::new(KeyData::Rsa(public_data), "")
        .to_openssh()
        .map_err(|err| Error::KeyGeneration(err.to_string()))?;

    Ok(KeyPairText {
        public: format!("{}\n", public.trim_end()),
        private,
    })
}

pub fn read_key_pair(path: impl AsRef<Path>) -> Result<KeyPairText> {
    let path = path.as_ref();
    let private = read_key_file(path)?;
    let public = read_key_file(&public_key_path(path))?;
    Ok(KeyPairText { public, private })
}

/// Writes both halves, creating missing parent directories. The private file is
/// owner read/write only, the public file world readable.
pub fn write_key_pair(path: impl AsRef<Path>, pair: &KeyPairText) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::KeyPairIo {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    write_key_file(path, &pair.private, PRIVATE_KEY_MODE)?;
    write_key_file(&public_key_path(path), &pair.public, PUBLIC_KEY_MODE)
}

fn read_key_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| Error::KeyPairIo {
        path: path.to_path_buf(),
        source,
    })
}

fn write_key_file(path: &Path, content: &str, mode: u32) -> Result<()> {
    let to_error = |source| Error::KeyPairIo {
        path: path.to_path_buf(),
        source,
    };
    // mode only applies on creation, an existing file is tightened before any byte lands
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
        .map_err(to_error)?;
    file.set_permissions(Permissions::from_mode(mode)).map_err(to_error)?;
    file.write_all(content.as_bytes()).map_err(to_error)?;
    file.sync_all().map_err(to_error)
}
