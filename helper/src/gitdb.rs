use anyhow::Result;
use git2::{ObjectType, Odb, Oid};
use xcrypt_protocol::{Error, ObjectId, ObjectKind};
use xcrypt_sdk::store::ObjectStore;

/// The repository object database seen through the translation core's
/// store interface.
pub struct GitStore<'repo> {
    odb: Odb<'repo>,
}

impl<'repo> GitStore<'repo> {
    pub fn new(odb: Odb<'repo>) -> Self {
        Self { odb }
    }
}

pub fn to_git_oid(id: &ObjectId) -> Result<Oid> {
    Ok(Oid::from_bytes(&id.as_bytes()[..ObjectId::SHORT_LEN])?)
}

pub fn from_git_oid(oid: Oid) -> ObjectId {
    ObjectId::from_raw(oid.as_bytes()).expect("odb ids are 20 bytes")
}

fn to_kind(object_type: ObjectType) -> Result<ObjectKind> {
    match object_type {
        ObjectType::Commit => Ok(ObjectKind::Commit),
        ObjectType::Tree => Ok(ObjectKind::Tree),
        ObjectType::Blob => Ok(ObjectKind::Blob),
        other => Err(Error::Store(format!("unsupported object type: {other}")).into()),
    }
}

fn from_kind(kind: ObjectKind) -> ObjectType {
    match kind {
        ObjectKind::Commit => ObjectType::Commit,
        ObjectKind::Tree => ObjectType::Tree,
        ObjectKind::Blob => ObjectType::Blob,
    }
}

impl ObjectStore for GitStore<'_> {
    fn read(&self, id: &ObjectId) -> Result<(ObjectKind, Vec<u8>)> {
        let object = self
            .odb
            .read(to_git_oid(id)?)
            .map_err(|err| Error::Store(format!("read {id}: {err}")))?;
        Ok((to_kind(object.kind())?, object.data().to_vec()))
    }

    fn read_header(&self, id: &ObjectId) -> Result<(ObjectKind, usize)> {
        let (len, object_type) = self
            .odb
            .read_header(to_git_oid(id)?)
            .map_err(|err| Error::Store(format!("read header {id}: {err}")))?;
        Ok((to_kind(object_type)?, len))
    }

    fn write(&self, kind: ObjectKind, data: &[u8]) -> Result<ObjectId> {
        let oid = self
            .odb
            .write(from_kind(kind), data)
            .map_err(|err| Error::Store(format!("write {kind}: {err}")))?;
        Ok(from_git_oid(oid))
    }

    fn exists(&self, id: &ObjectId) -> bool {
        to_git_oid(id).map(|oid| self.odb.exists(oid)).unwrap_or(false)
    }
}
