use std::io::Read;

use anyhow::{anyhow, Context, Result};
use bzip3::read::{Bz3Decoder, Bz3Encoder};
use xcrypt_protocol::{Error, ObjectId, Password};

use crate::crypto::ObjectCipher;

/// Largest plaintext object the codec accepts: 128 MiB − 1.
pub const MAX_OBJECT_SIZE: usize = 128 * 1024 * 1024 - 1;

/// Ceiling for an assembled frame or ciphertext body: the worst-case
/// compressed size plus the id bookends and length preamble.
pub(crate) const MAX_FRAME_SIZE: usize =
    16 + 9 + (MAX_OBJECT_SIZE + MAX_OBJECT_SIZE / 50 + 32) + 16 + 32;

/// Smallest compression block; larger objects get a block (and a compressor
/// state) sized to the whole input.
const MIN_BLOCK_SIZE: usize = 65 * 1024;

/// Frame recovered by [`Codec::decode`]. The id halves come from the frame
/// bookends; callers compare them against the id the object store computes
/// for the written payload.
pub struct Frame {
    pub id_head: [u8; 16],
    pub id_tail: [u8; 4],
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn verify_id(&self, id: &ObjectId) -> Result<()> {
        let raw = id.as_bytes();
        if self.id_head[..] != raw[..16] || self.id_tail[..] != raw[16..20] {
            return Err(Error::Corruption(format!("object id mismatch for {id}")).into());
        }
        Ok(())
    }
}

/// The per-object codec: compression framing plus the AES layer. Holds a
/// reusable scratch buffer for the frame; the core runs single-threaded, so
/// one codec per session is enough.
pub struct Codec {
    cipher: ObjectCipher,
    scratch: Vec<u8>,
}

impl Codec {
    pub fn new(password: &Password) -> Self {
        Self {
            cipher: ObjectCipher::new(password),
            scratch: Vec::new(),
        }
    }

    /// Frames, compresses and encrypts one object body.
    pub fn encode(&mut self, id: &ObjectId, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() > MAX_OBJECT_SIZE {
            return Err(Error::InputTooLarge { size: data.len() }.into());
        }

        let frame = &mut self.scratch;
        frame.clear();
        frame.extend_from_slice(&id.as_bytes()[..16]);

        // Size preamble: bytes are written until the value is exhausted and
        // the length code is the index of the last byte written.
        let code_at = frame.len();
        frame.push(0);
        let mut size = data.len() as u64;
        for i in 0..8u8 {
            frame.push(size as u8);
            size >>= 8;
            if size == 0 {
                frame[code_at] = i;
                break;
            }
        }

        let block_size = data.len().max(MIN_BLOCK_SIZE);
        let mut encoder = Bz3Encoder::new(data, block_size)
            .map_err(|err| anyhow!("bzip3 encoder setup failed: {err}"))?;
        encoder
            .read_to_end(frame)
            .context("bzip3 compression failed")?;

        frame.extend_from_slice(&id.as_bytes()[16..20]);
        frame.extend_from_slice(&[0u8; 12]);

        self.cipher.encrypt(&self.scratch)
    }

    /// Decrypts, validates and decompresses one ciphertext body.
    pub fn decode(&mut self, data: &[u8]) -> Result<Frame> {
        let frame = self.cipher.decrypt(data)?;

        if frame.len() < 16 + 2 + 16 {
            return Err(corrupt("frame too short"));
        }
        let id_head = <[u8; 16]>::try_from(&frame[..16])?;

        let len_code = frame[16] as usize;
        if len_code > 7 {
            return Err(corrupt("invalid frame length code"));
        }
        let compressed_at = 16 + 1 + len_code + 1;
        if frame.len() < compressed_at + 16 {
            return Err(corrupt("frame too short"));
        }
        let mut size = 0u64;
        for (i, &byte) in frame[17..compressed_at].iter().enumerate() {
            size |= u64::from(byte) << (i * 8);
        }
        let size = usize::try_from(size)?;
        if size > MAX_OBJECT_SIZE {
            return Err(corrupt("declared size out of range"));
        }

        let trailer = &frame[frame.len() - 16..];
        let id_tail = <[u8; 4]>::try_from(&trailer[..4])?;
        if trailer[4..] != [0u8; 12] {
            return Err(corrupt("nonzero frame trailer"));
        }

        let compressed = &frame[compressed_at..frame.len() - 16];
        let mut decoder =
            Bz3Decoder::new(compressed).map_err(|err| corrupt(&format!("bzip3 header: {err}")))?;
        let mut payload = Vec::with_capacity(size);
        decoder
            .read_to_end(&mut payload)
            .map_err(|err| corrupt(&format!("bzip3 decode: {err}")))?;
        if payload.len() != size {
            return Err(corrupt("payload length mismatch"));
        }

        Ok(Frame {
            id_head,
            id_tail,
            payload,
        })
    }
}

fn corrupt(message: &str) -> anyhow::Error {
    Error::Corruption(message.into()).into()
}
