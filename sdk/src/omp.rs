//! Encrypted persistence of plaintext/ciphertext id pairs.
//!
//! The on-disk file lives at `<git_dir>/xcrypt/<remote>.omp` and holds a
//! packed array of 64-byte `(id, partner)` records followed by a SHA3-256
//! checksum over the array, all encrypted with the object cipher. Both
//! orientations of a pair are kept in memory so either id resolves its
//! partner; only one orientation is written out.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha3::{Digest, Sha3_256};
use tracing::debug;
use xcrypt_protocol::{Error, ObjectId, Password};

use crate::crypto::ObjectCipher;
use crate::store::ObjectStore;

const RECORD_LEN: usize = 64;
const CHECKSUM_LEN: usize = 32;

pub struct OidMap {
    path: PathBuf,
    cipher: ObjectCipher,
    map: HashMap<ObjectId, ObjectId>,
    modified: bool,
}

impl OidMap {
    pub fn new(git_dir: &Path, remote_name: &str, password: &Password) -> Self {
        Self {
            path: Self::file_path(git_dir, remote_name),
            cipher: ObjectCipher::new(password),
            map: HashMap::new(),
            modified: false,
        }
    }

    /// Where the map of `remote_name` lives under `git_dir`.
    pub fn file_path(git_dir: &Path, remote_name: &str) -> PathBuf {
        git_dir.join("xcrypt").join(format!("{remote_name}.omp"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Reads the map from disk. A missing file is an empty map; anything
    /// else that fails to load is corruption. Loading does not mark the
    /// map modified.
    pub fn load(&mut self) -> Result<()> {
        let data = match fs_err::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        if data.len() % RECORD_LEN != CHECKSUM_LEN + 16 {
            return Err(Error::Corruption("oid map length".into()).into());
        }

        let plain = self
            .cipher
            .decrypt(&data)
            .context("oid map decryption failed")?;
        if plain.len() < CHECKSUM_LEN || (plain.len() - CHECKSUM_LEN) % RECORD_LEN != 0 {
            return Err(Error::Corruption("oid map payload length".into()).into());
        }

        let table_len = plain.len() - CHECKSUM_LEN;
        let digest: [u8; 32] = Sha3_256::digest(&plain[..table_len]).into();
        if digest[..] != plain[table_len..] {
            return Err(Error::Corruption("oid map checksum".into()).into());
        }

        for record in plain[..table_len].chunks_exact(RECORD_LEN) {
            let a = ObjectId::from_raw(&record[..32])?;
            let b = ObjectId::from_raw(&record[32..])?;
            self.insert_one(a, b)?;
            self.insert_one(b, a)?;
        }
        debug!("loaded {} oid pairs from {}", self.map.len() / 2, self.path.display());
        Ok(())
    }

    /// Looks up the partner of `id` in either direction. A pair whose
    /// partner no longer exists in the object store is treated as absent.
    pub fn find<S: ObjectStore>(&self, id: &ObjectId, store: &S) -> Option<ObjectId> {
        let partner = self.map.get(id)?;
        if !store.exists(partner) {
            return None;
        }
        Some(*partner)
    }

    /// Records a translation in both directions. An existing entry with a
    /// different partner is an invariant violation.
    pub fn insert(&mut self, a: ObjectId, b: ObjectId) -> Result<()> {
        if self.insert_one(a, b)? {
            self.modified = true;
        }
        if self.insert_one(b, a)? {
            self.modified = true;
        }
        Ok(())
    }

    fn insert_one(&mut self, key: ObjectId, value: ObjectId) -> Result<bool> {
        match self.map.entry(key) {
            Entry::Vacant(entry) => {
                entry.insert(value);
                Ok(true)
            }
            Entry::Occupied(entry) if *entry.get() == value => Ok(false),
            Entry::Occupied(_) => {
                Err(Error::Corruption(format!("conflicting oid mapping for {key}")).into())
            }
        }
    }

    /// Writes the map back if anything changed: encrypt to `<name>.omp.tmp`,
    /// then rename over the real file so an interrupt leaves one intact copy.
    pub fn store(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let dir = self.path.parent().context("oid map path has no parent")?;
        fs_err::create_dir_all(dir)?;

        let mut table = Vec::with_capacity(self.map.len() / 2 * RECORD_LEN + CHECKSUM_LEN);
        let mut written = HashSet::new();
        for (a, b) in &self.map {
            if written.contains(a) || written.contains(b) {
                continue;
            }
            written.insert(*a);
            written.insert(*b);
            table.extend_from_slice(a.as_bytes());
            table.extend_from_slice(b.as_bytes());
        }
        let digest: [u8; 32] = Sha3_256::digest(&table).into();
        table.extend_from_slice(&digest);
        let encrypted = self.cipher.encrypt(&table)?;

        let tmp_path = self.path.with_extension("omp.tmp");
        fs_err::write(&tmp_path, &encrypted)?;
        fs_err::rename(&tmp_path, &self.path)?;
        self.modified = false;
        debug!("stored {} oid pairs to {}", written.len() / 2, self.path.display());
        Ok(())
    }
}
