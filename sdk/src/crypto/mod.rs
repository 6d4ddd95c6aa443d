//! Per-object encryption.
//!
//! Every object travels through the same two-layer codec, regardless of its
//! kind. The compression layer builds a frame around the bzip3-compressed
//! object bytes:
//!
//! - first 16 bytes of the plaintext object id
//! - a length code `L` (0..=7) followed by `L + 1` little-endian bytes
//!   holding the plaintext size
//! - the bzip3-compressed plaintext
//! - bytes 16..20 of the plaintext object id, then 12 zero bytes
//!
//! The id bookends double as an integrity check on decryption, and the
//! 32-byte id slots keep the frame compatible with both 20-byte and 32-byte
//! hash schemes (a 20-byte id leaves the tail of its second slot zero).
//!
//! The AES layer produces a deterministic ciphertext without storing a nonce.
//! The frame's first 16 bytes (== the id prefix) act as the iv and are
//! written out encrypted under AES-256-ECB with the full 32-byte password
//! material; XOR of that block with the iv yields a one-time AES-128 key,
//! and the rest of the frame goes through AES-128-CBC with PKCS#7 padding.
//! Decryption recovers the iv from the first block and re-derives the key
//! the same way. Determinism matters: encrypting the same object under the
//! same password from two clones must yield identical ciphertext ids.

mod cipher;
mod frame;

pub(crate) use cipher::ObjectCipher;
pub(crate) use frame::MAX_FRAME_SIZE;
pub use frame::{Codec, Frame, MAX_OBJECT_SIZE};
