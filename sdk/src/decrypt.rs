//! Ciphertext-to-plaintext graph translation.
//!
//! Decryption of one object never needs its children decrypted first (a
//! tree reads its sentinel blob straight from the store), so the walk is a
//! simple work list. Newly discovered references go to the front of the
//! list; commits only contribute their tree reference, because the driver
//! feeds every commit that needs decrypting as its own root.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::Ordering;

use anyhow::Result;
use tracing::debug;
use xcrypt_protocol::{Error, ObjectId, ObjectKind};

use crate::counters::Counters;
use crate::crypto::Codec;
use crate::object;
use crate::omp::OidMap;
use crate::store::ObjectStore;

pub struct Decryptor<'a, S> {
    store: &'a S,
    codec: &'a mut Codec,
    omp: &'a mut OidMap,
    counters: &'a Counters,
}

impl<'a, S: ObjectStore> Decryptor<'a, S> {
    pub fn new(
        store: &'a S,
        codec: &'a mut Codec,
        omp: &'a mut OidMap,
        counters: &'a Counters,
    ) -> Self {
        Self {
            store,
            codec,
            omp,
            counters,
        }
    }

    /// Translates every object reachable from the ciphertext `roots`.
    pub fn run(&mut self, roots: impl IntoIterator<Item = ObjectId>) -> Result<()> {
        let mut list = VecDeque::new();
        let mut seen = HashSet::new();
        for id in roots {
            if seen.insert(id) {
                list.push_back(id);
            }
        }

        while let Some(id) = list.pop_front() {
            let (kind, data) = self.store.read(&id)?;

            let mut refs = match kind {
                ObjectKind::Commit => object::commit_refs(&data)?,
                ObjectKind::Tree => object::tree_entries(&data)?
                    .into_iter()
                    .map(|entry| entry.id)
                    .collect(),
                ObjectKind::Blob => Vec::new(),
            };
            match kind {
                // Only the tree pointer; parents arrive as their own roots.
                ObjectKind::Commit => refs.truncate(1),
                // Everything except the trailing sentinel blob.
                ObjectKind::Tree => {
                    refs.pop();
                }
                ObjectKind::Blob => {}
            }
            for child in refs {
                if seen.insert(child) {
                    list.push_front(child);
                }
            }

            self.decrypt_object(&id, kind, &data)?;
        }
        Ok(())
    }

    /// Translates a single ciphertext object and returns its plain id.
    pub fn translate(&mut self, id: ObjectId) -> Result<ObjectId> {
        let (kind, data) = self.store.read(&id)?;
        self.decrypt_object(&id, kind, &data)
    }

    fn decrypt_object(&mut self, cipher_id: &ObjectId, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        if let Some(plain) = self.omp.find(cipher_id, self.store) {
            debug!("decrypt {kind} {cipher_id} cached");
            self.counters.reused_decrypted.fetch_add(1, Ordering::Relaxed);
            return Ok(plain);
        }

        let plain_id = match kind {
            ObjectKind::Commit => self.decrypt_commit(data)?,
            ObjectKind::Tree => self.decrypt_tree(data)?,
            ObjectKind::Blob => self.write_plain(ObjectKind::Blob, data)?,
        };
        debug!("decrypt {kind} {cipher_id} -> {plain_id}");
        self.counters.decrypted_objects.fetch_add(1, Ordering::Relaxed);
        self.omp.insert(*cipher_id, plain_id)?;
        Ok(plain_id)
    }

    /// Decodes one ciphertext body, writes the payload, and checks the
    /// frame's id bookends against the id the store computed.
    fn write_plain(&mut self, kind: ObjectKind, ciphertext: &[u8]) -> Result<ObjectId> {
        let frame = self.codec.decode(ciphertext)?;
        let id = self.store.write(kind, &frame.payload)?;
        frame.verify_id(&id)?;
        Ok(id)
    }

    fn decrypt_commit(&mut self, data: &[u8]) -> Result<ObjectId> {
        let payload = object::commit_payload(data)?;
        let ciphertext = object::unfold_base64(payload)?;
        self.write_plain(ObjectKind::Commit, &ciphertext)
    }

    fn decrypt_tree(&mut self, data: &[u8]) -> Result<ObjectId> {
        if data.len() <= ObjectId::SHORT_LEN {
            return Err(Error::Corruption("cipher tree too short".into()).into());
        }
        let blob_id = ObjectId::from_raw(&data[data.len() - ObjectId::SHORT_LEN..])?;
        let (kind, blob) = self.store.read(&blob_id)?;
        if kind != ObjectKind::Blob {
            return Err(Error::Corruption(format!(
                "tree sentinel {blob_id} is a {kind}, expected a blob"
            ))
            .into());
        }
        self.write_plain(ObjectKind::Tree, &blob)
    }
}
