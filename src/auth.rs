//! chap-sha1 challenge-response authentication.
//!
//! ```text
//! step1    = sha1(password)
//! step2    = sha1(step1)
//! step3    = sha1(salt[..20] ++ step2)
//! scramble = step1 XOR step3
//! ```

use sha1::{Digest, Sha1};

use crate::error::{DriverError, Result};
use crate::protocol::{AuthRequest, AuthTuple};

/// Name of the only supported authentication method.
pub const CHAP_SHA1: &str = "chap-sha1";

/// Size of a SHA-1 digest and of the salt prefix that is mixed in.
pub const SCRAMBLE_SIZE: usize = 20;

/// Derive the chap-sha1 scramble for `password` against the greeting salt.
///
/// # Errors
///
/// `Protocol` if the salt is shorter than [`SCRAMBLE_SIZE`] bytes.
pub fn chap_sha1_scramble(password: &str, salt: &[u8]) -> Result<[u8; SCRAMBLE_SIZE]> {
    if salt.len() < SCRAMBLE_SIZE {
        return Err(DriverError::protocol(format!(
            "salt has {} bytes, need at least {SCRAMBLE_SIZE}",
            salt.len()
        )));
    }

    let step1 = Sha1::digest(password.as_bytes());
    let step2 = Sha1::digest(step1);

    let mut hasher = Sha1::new();
    hasher.update(&salt[..SCRAMBLE_SIZE]);
    hasher.update(step2);
    let step3 = hasher.finalize();

    let mut scramble = [0u8; SCRAMBLE_SIZE];
    for (out, (a, b)) in scramble.iter_mut().zip(step1.iter().zip(step3.iter())) {
        *out = a ^ b;
    }
    Ok(scramble)
}

/// Credential sent for an authenticated connection.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthenticationInfo {
    pub user_name: String,
    pub method: &'static str,
    pub scramble: [u8; SCRAMBLE_SIZE],
}

impl AuthenticationInfo {
    /// Derive the credential for `user_name` / `password` against `salt`.
    pub fn chap_sha1(user_name: &str, password: &str, salt: &[u8]) -> Result<Self> {
        Ok(Self {
            user_name: user_name.to_string(),
            method: CHAP_SHA1,
            scramble: chap_sha1_scramble(password, salt)?,
        })
    }

    /// Body of the `Auth` request carrying this credential.
    pub fn to_request(&self) -> AuthRequest {
        AuthRequest {
            tuple: AuthTuple {
                method: self.method.to_string(),
                scramble: self.scramble.to_vec(),
            },
            user_name: self.user_name.clone(),
        }
    }
}

impl std::fmt::Debug for AuthenticationInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationInfo")
            .field("user_name", &self.user_name)
            .field("method", &self.method)
            .field("scramble", &"[redacted]")
            .finish()
    }
}
