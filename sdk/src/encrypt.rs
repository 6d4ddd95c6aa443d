//! Plaintext-to-ciphertext graph translation.
//!
//! A ciphertext commit or tree may only be written once every reference it
//! carries has a ciphertext counterpart, so the walk is post-order. Deep
//! histories would overflow the call stack, hence an explicit work stack:
//! the first visit of an item parses its references and pushes untranslated
//! children, the second visit (after those children resolved) rewrites the
//! deferred references and writes the ciphertext object.

use std::collections::HashSet;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use tracing::debug;
use xcrypt_protocol::{Error, ObjectId, ObjectKind};

use crate::counters::Counters;
use crate::crypto::{Codec, MAX_FRAME_SIZE, MAX_OBJECT_SIZE};
use crate::object::{self, GITLINK_MODE, SENTINEL_MODE};
use crate::omp::OidMap;
use crate::store::ObjectStore;

struct WorkItem {
    id: ObjectId,
    second_pass: bool,
    refs: Vec<ObjectId>,
    /// Indices into `refs` whose translation was deferred to children.
    pending: Vec<usize>,
}

impl WorkItem {
    fn new(id: ObjectId) -> Self {
        Self {
            id,
            second_pass: false,
            refs: Vec::new(),
            pending: Vec::new(),
        }
    }
}

pub struct Encryptor<'a, S> {
    store: &'a S,
    codec: &'a mut Codec,
    omp: &'a mut OidMap,
    counters: &'a Counters,
    /// Plaintext ids already handled this session.
    done: HashSet<ObjectId>,
    stack: Vec<WorkItem>,
}

impl<'a, S: ObjectStore> Encryptor<'a, S> {
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
            done: HashSet::new(),
            stack: Vec::new(),
        }
    }

    /// Translates every object reachable from `roots`.
    pub fn run(&mut self, roots: impl IntoIterator<Item = ObjectId>) -> Result<()> {
        for id in roots {
            self.stack.push(WorkItem::new(id));
        }
        self.drain()
    }

    /// Translates a single graph rooted at `id` and returns its cipher id.
    pub fn translate(&mut self, id: ObjectId) -> Result<ObjectId> {
        self.stack.push(WorkItem::new(id));
        self.drain()?;
        self.omp
            .find(&id, self.store)
            .context("object missing after encryption")
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(top) = self.stack.len().checked_sub(1) {
            let id = self.stack[top].id;

            // Pushed again through another parent after it was already
            // translated; the parent resolves the reference on its own.
            if !self.stack[top].second_pass && self.done.contains(&id) {
                self.counters.reused_encrypted.fetch_add(1, Ordering::Relaxed);
                self.stack.pop();
                continue;
            }

            let (kind, data) = self.store.read(&id)?;

            if !self.stack[top].second_pass {
                self.stack[top].second_pass = true;
                self.stack[top].refs = match kind {
                    ObjectKind::Commit => object::commit_refs(&data)?,
                    ObjectKind::Tree => tree_refs(&data)?,
                    ObjectKind::Blob => Vec::new(),
                };

                let count = self.stack[top].refs.len();
                let mut deferred = false;
                match kind {
                    // Parents go on the stack before the tree so the tree
                    // is translated first when work resumes.
                    ObjectKind::Commit => {
                        if count == 0 {
                            return Err(Error::Corruption(format!(
                                "commit {id} without tree reference"
                            ))
                            .into());
                        }
                        for index in 1..count {
                            deferred |= self.resolve_or_push(top, index)?;
                        }
                        deferred |= self.resolve_or_push(top, 0)?;
                    }
                    ObjectKind::Tree => {
                        for index in 0..count {
                            deferred |= self.resolve_or_push(top, index)?;
                        }
                    }
                    ObjectKind::Blob => {}
                }
                if deferred {
                    continue;
                }
            }

            // Children have resolved; pick up the deferred translations.
            let pending = std::mem::take(&mut self.stack[top].pending);
            for index in pending {
                let child = self.stack[top].refs[index];
                let cipher = self.omp.find(&child, self.store).ok_or_else(|| {
                    Error::Store(format!("missing translation for {child}"))
                })?;
                self.stack[top].refs[index] = cipher;
            }

            // Translated in an earlier session: the map already has it.
            if self.omp.find(&id, self.store).is_some() {
                debug!("encrypt {kind} {id} cached");
                self.counters.reused_encrypted.fetch_add(1, Ordering::Relaxed);
                self.done.insert(id);
                self.stack.pop();
                continue;
            }

            let refs = std::mem::take(&mut self.stack[top].refs);
            let cipher_id = match kind {
                ObjectKind::Commit => self.encrypt_commit(&id, &data, &refs)?,
                ObjectKind::Tree => self.encrypt_tree(&id, &data, &refs)?,
                ObjectKind::Blob => self.encrypt_blob(&id, &data)?,
            };
            debug!("encrypt {kind} {id} -> {cipher_id}");
            self.counters.encrypted_objects.fetch_add(1, Ordering::Relaxed);
            self.omp.insert(id, cipher_id)?;
            self.done.insert(id);
            self.stack.pop();
        }
        Ok(())
    }

    /// Rewrites `refs[index]` if its translation is already known, otherwise
    /// pushes the child and marks the index pending. Returns whether work
    /// was deferred.
    fn resolve_or_push(&mut self, item: usize, index: usize) -> Result<bool> {
        let child = self.stack[item].refs[index];
        if let Some(cipher) = self.omp.find(&child, self.store) {
            self.stack[item].refs[index] = cipher;
            return Ok(false);
        }
        if self.done.contains(&child) {
            // Translated this session but its ciphertext vanished from the
            // store; nothing can reference it anymore.
            return Err(Error::Store(format!("missing translation for {child}")).into());
        }
        self.stack[item].pending.push(index);
        self.stack.push(WorkItem::new(child));
        Ok(true)
    }

    fn encrypt_blob(&mut self, id: &ObjectId, data: &[u8]) -> Result<ObjectId> {
        let text = self.codec.encode(id, data)?;
        self.store.write(ObjectKind::Blob, &text)
    }

    fn encrypt_commit(&mut self, id: &ObjectId, data: &[u8], refs: &[ObjectId]) -> Result<ObjectId> {
        let text = self.codec.encode(id, data)?;

        let header = refs.len() * (6 + 1 + ObjectId::HEX_LEN + 1) - 2 + object::AUTHOR_BLOCK.len();
        let body = text.len().div_ceil(3) * 4 + (text.len() - 1) / 48;
        if header + body > MAX_FRAME_SIZE {
            return Err(Error::InputTooLarge {
                size: header + body,
            }
            .into());
        }

        let mut out = Vec::with_capacity(header + body);
        object::build_cipher_commit(refs, &text, &mut out);
        self.store.write(ObjectKind::Commit, &out)
    }

    /// Writes the codec output over the tree's own bytes as the sentinel
    /// blob, then a tree whose entries keep their modes and order but have
    /// their names replaced by fixed-width decimal indices.
    fn encrypt_tree(&mut self, id: &ObjectId, data: &[u8], refs: &[ObjectId]) -> Result<ObjectId> {
        let self_blob = self.encrypt_blob(id, data)?;

        let width = decimal_width(refs.len());
        let mut out = Vec::with_capacity(data.len() + refs.len() * 8);
        let mut index = 0usize;
        for entry in object::tree_entries(data)? {
            if entry.mode == GITLINK_MODE {
                continue;
            }
            let cipher = refs
                .get(index)
                .context("tree reference count mismatch")?;
            out.extend_from_slice(entry.mode_raw);
            out.push(b' ');
            out.extend_from_slice(format!("{index:0width$}").as_bytes());
            out.push(0);
            out.extend_from_slice(cipher.short_bytes());
            index += 1;
        }
        if index != refs.len() {
            return Err(Error::Corruption(format!("tree {id} changed while encrypting")).into());
        }

        out.extend_from_slice(SENTINEL_MODE);
        out.push(b' ');
        out.extend_from_slice(format!("{index:0width$}").as_bytes());
        out.push(0);
        out.extend_from_slice(self_blob.short_bytes());

        if out.len() > MAX_OBJECT_SIZE {
            return Err(Error::InputTooLarge { size: out.len() }.into());
        }
        self.store.write(ObjectKind::Tree, &out)
    }
}

/// Reference list of a tree: every entry id except gitlinks, in entry order.
fn tree_refs(data: &[u8]) -> Result<Vec<ObjectId>> {
    Ok(object::tree_entries(data)?
        .into_iter()
        .filter(|entry| entry.mode != GITLINK_MODE)
        .map(|entry| entry.id)
        .collect())
}

fn decimal_width(mut value: usize) -> usize {
    let mut width = 1;
    while value >= 10 {
        value /= 10;
        width += 1;
    }
    width
}
