use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256, Block};
use anyhow::Result;
use xcrypt_protocol::{Error, Password};

type CbcEncryptor = cbc::Encryptor<Aes128>;
type CbcDecryptor = cbc::Decryptor<Aes128>;

/// AES layer shared by the object codec and the oid map file.
///
/// The first 16 bytes of input are encrypted as a single AES-256-ECB block
/// under the full password material; the per-object AES-128 key is the XOR
/// of that block with the input's first 16 bytes, which also serve as the
/// CBC iv.
pub(crate) struct ObjectCipher {
    outer: Aes256,
}

impl ObjectCipher {
    pub fn new(password: &Password) -> Self {
        Self {
            outer: Aes256::new(password.material().into()),
        }
    }

    /// Encrypts a buffer of at least 32 bytes.
    pub fn encrypt(&self, plain: &[u8]) -> Result<Vec<u8>> {
        if plain.len() < 32 {
            return Err(Error::Corruption(format!("plaintext too short: {}", plain.len())).into());
        }
        let iv = <[u8; 16]>::try_from(&plain[..16])?;
        let mut head = Block::from(iv);
        self.outer.encrypt_block(&mut head);

        let mut key = [0u8; 16];
        for (k, (a, b)) in key.iter_mut().zip(iv.iter().zip(head.iter())) {
            *k = a ^ b;
        }

        let mut out = Vec::with_capacity(plain.len() + 32);
        out.extend_from_slice(&head);
        let body =
            CbcEncryptor::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(&plain[16..]);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Inverts [`Self::encrypt`]. The ciphertext must be at least 48 bytes
    /// (head block, one body block, one padding block) and block-aligned.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < 48 || data.len() % 16 != 0 {
            return Err(Error::Corruption(format!("ciphertext length: {}", data.len())).into());
        }
        let mut head = Block::clone_from_slice(&data[..16]);
        self.outer.decrypt_block(&mut head);
        let iv = <[u8; 16]>::try_from(head.as_slice())?;

        let mut key = [0u8; 16];
        for (k, (a, b)) in key.iter_mut().zip(data.iter().zip(iv.iter())) {
            *k = a ^ b;
        }

        let body = CbcDecryptor::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&data[16..])
            .map_err(|_| Error::Corruption("decryption failed".into()))?;

        let mut out = Vec::with_capacity(16 + body.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&body);
        Ok(out)
    }
}
