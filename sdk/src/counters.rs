use std::sync::atomic::{AtomicU64, Ordering};

use tracing::info;

/// Session totals for both translation directions. Plain atomics so a
/// progress reporter may read them while the single-threaded core writes.
#[derive(Debug, Default)]
pub struct Counters {
    pub encrypted_objects: AtomicU64,
    pub reused_encrypted: AtomicU64,
    pub decrypted_objects: AtomicU64,
    pub reused_decrypted: AtomicU64,
}

impl Counters {
    pub fn report(&self) {
        let encrypted = self.encrypted_objects.load(Ordering::Relaxed);
        let reused_encrypted = self.reused_encrypted.load(Ordering::Relaxed);
        if encrypted > 0 || reused_encrypted > 0 {
            info!(
                "Encrypted {} objects ({} already translated)",
                encrypted, reused_encrypted
            );
        }

        let decrypted = self.decrypted_objects.load(Ordering::Relaxed);
        let reused_decrypted = self.reused_decrypted.load(Ordering::Relaxed);
        if decrypted > 0 || reused_decrypted > 0 {
            info!(
                "Decrypted {} objects ({} already translated)",
                decrypted, reused_decrypted
            );
        }
    }
}
