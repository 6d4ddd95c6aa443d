use std::cell::RefCell;
use std::collections::HashMap;

use anyhow::Result;
use sha3::{Digest, Sha3_256};
use xcrypt_protocol::{Error, ObjectId, ObjectKind};

/// The slice of the content-addressed object database the translation core
/// needs. The helper binary backs this with the repository odb; tests use
/// [`MemoryStore`].
pub trait ObjectStore {
    fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)>;
    fn read_header(&self, id: &ObjectId) -> Result<(ObjectKind, usize)>;
    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId>;
    fn exists(&self, id: &ObjectId) -> bool;
}

/// In-memory object store with 20-byte content-derived ids, matching the
/// short-hash layout of the real store. Used by tests.
#[derive(Default)]
pub struct MemoryStore {
    objects: RefCell<HashMap<ObjectId, (ObjectKind, Vec<u8>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The id `write` assigns: a truncated digest over a
    /// `<kind> <len>\0<data>` header, like the real store computes.
    pub fn object_id(kind: ObjectKind, data: &[u8]) -> ObjectId {
        let mut hasher = Sha3_256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update(format!(" {}\0", data.len()).as_bytes());
        hasher.update(data);
        let digest: [u8; 32] = hasher.finalize().into();
        ObjectId::from_raw(&digest[..ObjectId::SHORT_LEN]).expect("fixed length")
    }

    pub fn len(&self) -> usize {
        self.objects.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, id: &ObjectId) {
        self.objects.borrow_mut().remove(id);
    }
}

impl ObjectStore for MemoryStore {
    fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        self.objects
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Store(format!("object not found: {id}")).into())
    }

    fn read_header(&self, id: &ObjectId) -> Result<(ObjectKind, usize)> {
        self.objects
            .borrow()
            .get(id)
            .map(|(kind, data)| (*kind, data.len()))
            .ok_or_else(|| Error::Store(format!("object not found: {id}")).into())
    }

    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let id = Self::object_id(kind, data);
        self.objects
            .borrow_mut()
            .insert(id, (kind, data.to_vec()));
        Ok(id)
    }

    fn exists(&self, id: &ObjectId) -> bool {
        self.objects.borrow().contains_key(id)
    }
}
