use std::fmt;

use sha3::{Digest, Sha3_256};

use crate::Error;

/// Required prefix of the configured secret. It marks the current derivation
/// scheme; any other prefix is reserved and rejected.
pub const SECRET_PREFIX: &str = "psw:";

/// Password material derived from the user secret: SHA3-256 over the bytes
/// after the `psw:` prefix. The first half keys the per-object cipher, the
/// second half is the iv reserve; the AES-256 step consumes all 32 bytes.
#[derive(Clone)]
pub struct Password {
    md: [u8; 32],
}

impl Password {
    pub fn derive(secret: &str) -> Result<Self, Error> {
        let Some(real) = secret.strip_prefix(SECRET_PREFIX) else {
            return Err(Error::ConfigMissing(format!(
                "secret key must start with `{SECRET_PREFIX}`"
            )));
        };
        if real.is_empty() {
            return Err(Error::ConfigMissing("secret key is empty".into()));
        }
        Ok(Self {
            md: Sha3_256::digest(real.as_bytes()).into(),
        })
    }

    pub fn material(&self) -> &[u8; 32] {
        &self.md
    }

    pub fn key_half(&self) -> &[u8] {
        &self.md[..16]
    }

    pub fn iv_half(&self) -> &[u8] {
        &self.md[16..]
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Password").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_splits_digest() {
        let password = Password::derive("psw:hunter2").unwrap();
        let md: [u8; 32] = Sha3_256::digest(b"hunter2").into();
        assert_eq!(password.material(), &md);
        assert_eq!(password.key_half(), &md[..16]);
        assert_eq!(password.iv_half(), &md[16..]);
    }

    #[test]
    fn derive_rejects_bad_format() {
        assert!(Password::derive("hunter2").is_err());
        assert!(Password::derive("psw:").is_err());
        assert!(Password::derive("pwd:hunter2").is_err());
        assert!(Password::derive("").is_err());
    }
}
