use std::collections::{HashSet, VecDeque};

use tempfile::TempDir;
use xcrypt_protocol::{ObjectId, ObjectKind, Password};
use xcrypt_sdk::counters::Counters;
use xcrypt_sdk::crypto::Codec;
use xcrypt_sdk::decrypt::Decryptor;
use xcrypt_sdk::encrypt::Encryptor;
use xcrypt_sdk::object;
use xcrypt_sdk::omp::OidMap;
use xcrypt_sdk::store::{MemoryStore, ObjectStore};

/// One helper session: a store plus the per-session translation state.
struct Session {
    _dir: TempDir,
    store: MemoryStore,
    codec: Codec,
    omp: OidMap,
    counters: Counters,
}

impl Session {
    fn new(store: MemoryStore) -> Self {
        let dir = TempDir::new().unwrap();
        let password = Password::derive("psw:hunter2").unwrap();
        let omp = OidMap::new(dir.path(), "origin", &password);
        Session {
            _dir: dir,
            store,
            codec: Codec::new(&password),
            omp,
            counters: Counters::default(),
        }
    }

    fn encrypt(&mut self, roots: &[ObjectId]) {
        Encryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters)
            .run(roots.iter().copied())
            .unwrap();
    }

    fn encrypt_one(&mut self, id: ObjectId) -> ObjectId {
        Encryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters)
            .translate(id)
            .unwrap()
    }

    fn decrypt(&mut self, roots: &[ObjectId]) {
        Decryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters)
            .run(roots.iter().copied())
            .unwrap();
    }

    fn decrypt_one(&mut self, id: ObjectId) -> ObjectId {
        Decryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters)
            .translate(id)
            .unwrap()
    }

    fn partner(&self, id: ObjectId) -> ObjectId {
        self.omp.find(&id, &self.store).expect("missing translation")
    }
}

fn blob(store: &MemoryStore, content: &[u8]) -> ObjectId {
    store.write(ObjectKind::Blob, content).unwrap()
}

fn tree(store: &MemoryStore, entries: &[(&str, &str, ObjectId)]) -> ObjectId {
    let mut data = Vec::new();
    for (mode, name, id) in entries {
        data.extend_from_slice(mode.as_bytes());
        data.push(b' ');
        data.extend_from_slice(name.as_bytes());
        data.push(0);
        data.extend_from_slice(id.short_bytes());
    }
    store.write(ObjectKind::Tree, &data).unwrap()
}

fn commit(store: &MemoryStore, tree: ObjectId, parents: &[ObjectId], message: &str) -> ObjectId {
    let mut data = format!("tree {tree}\n");
    for parent in parents {
        data.push_str(&format!("parent {parent}\n"));
    }
    data.push_str("author dev <dev@example.com> 1700000000 +0000\n");
    data.push_str("committer dev <dev@example.com> 1700000000 +0000\n\n");
    data.push_str(message);
    data.push('\n');
    store.write(ObjectKind::Commit, data.as_bytes()).unwrap()
}

/// Copies a ciphertext graph into another store, the way a fetch materializes
/// remote objects locally.
fn transfer(src: &MemoryStore, dst: &MemoryStore, roots: &[ObjectId]) {
    let mut queue: VecDeque<ObjectId> = roots.iter().copied().collect();
    let mut seen: HashSet<ObjectId> = roots.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        let (kind, data) = src.read(&id).unwrap();
        let copied = dst.write(kind, &data).unwrap();
        assert_eq!(copied, id);

        let refs: Vec<ObjectId> = match kind {
            ObjectKind::Commit => object::commit_refs(&data).unwrap(),
            ObjectKind::Tree => object::tree_entries(&data)
                .unwrap()
                .into_iter()
                .map(|entry| entry.id)
                .collect(),
            ObjectKind::Blob => Vec::new(),
        };
        for child in refs {
            if seen.insert(child) {
                queue.push_back(child);
            }
        }
    }
}

#[test]
fn blob_roundtrip() {
    let store = MemoryStore::new();
    let plain = blob(&store, b"hello");
    let mut session = Session::new(store);

    let cipher = session.encrypt_one(plain);
    assert_ne!(cipher, plain);
    assert_eq!(session.partner(plain), cipher);
    assert_eq!(session.partner(cipher), plain);

    let (kind, cipher_data) = session.store.read(&cipher).unwrap();
    assert_eq!(kind, ObjectKind::Blob);
    assert_ne!(cipher_data, b"hello");

    let mut other = Session::new(session.store);
    assert_eq!(other.decrypt_one(cipher), plain);
    let (_, data) = other.store.read(&plain).unwrap();
    assert_eq!(data, b"hello");
}

#[test]
fn zero_byte_blob_roundtrips() {
    let store = MemoryStore::new();
    let plain = blob(&store, b"");
    let mut session = Session::new(store);
    let cipher = session.encrypt_one(plain);

    let mut other = Session::new(session.store);
    assert_eq!(other.decrypt_one(cipher), plain);
}

#[test]
fn commit_without_parents_roundtrips() {
    let store = MemoryStore::new();
    let file = blob(&store, b"readme");
    let root = tree(&store, &[("100644", "README", file)]);
    let first = commit(&store, root, &[], "initial");
    let mut session = Session::new(store);

    let cipher = session.encrypt_one(first);
    let (kind, data) = session.store.read(&cipher).unwrap();
    assert_eq!(kind, ObjectKind::Commit);
    let refs = object::commit_refs(&data).unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0], session.partner(root));

    let mut other = Session::new(session.store);
    assert_eq!(other.decrypt_one(cipher), first);
}

#[test]
fn cipher_tree_uses_indexed_names() {
    let store = MemoryStore::new();
    let a = blob(&store, b"contents of a");
    let b = blob(&store, b"contents of b");
    let plain_tree = tree(&store, &[("100644", "a", a), ("100644", "b", b)]);
    let (_, plain_tree_data) = store.read(&plain_tree).unwrap();
    let mut session = Session::new(store);

    let cipher_tree = session.encrypt_one(plain_tree);
    let (_, data) = session.store.read(&cipher_tree).unwrap();
    let entries = object::tree_entries(&data).unwrap();

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].name, b"0");
    assert_eq!(entries[1].name, b"1");
    assert_eq!(entries[2].name, b"2");
    assert_eq!(entries[0].mode_raw, b"100644");
    assert_eq!(entries[2].mode_raw, b"100664");
    assert_eq!(entries[0].id, session.partner(a));
    assert_eq!(entries[1].id, session.partner(b));

    // The sentinel blob carries the codec output over the plaintext tree.
    let (kind, sentinel) = session.store.read(&entries[2].id).unwrap();
    assert_eq!(kind, ObjectKind::Blob);
    let password = Password::derive("psw:hunter2").unwrap();
    let frame = Codec::new(&password).decode(&sentinel).unwrap();
    assert_eq!(frame.payload, plain_tree_data);
    frame.verify_id(&plain_tree).unwrap();
}

#[test]
fn single_entry_tree_has_width_one_names() {
    let store = MemoryStore::new();
    let file = blob(&store, b"only");
    let plain_tree = tree(&store, &[("100644", "only.txt", file)]);
    let mut session = Session::new(store);

    let cipher_tree = session.encrypt_one(plain_tree);
    let (_, data) = session.store.read(&cipher_tree).unwrap();
    let entries = object::tree_entries(&data).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].name, b"0");
    assert_eq!(entries[1].name, b"1");
}

#[test]
fn wide_tree_pads_names_to_common_width() {
    let store = MemoryStore::new();
    let mut entries = Vec::new();
    let contents: Vec<Vec<u8>> = (0..11u8).map(|i| vec![i; 10]).collect();
    let names: Vec<String> = (0..11u8).map(|i| format!("file{i}")).collect();
    for i in 0..11usize {
        entries.push(("100644", names[i].as_str(), blob(&store, &contents[i])));
    }
    let plain_tree = tree(&store, &entries);
    let mut session = Session::new(store);

    let cipher_tree = session.encrypt_one(plain_tree);
    let (_, data) = session.store.read(&cipher_tree).unwrap();
    let parsed = object::tree_entries(&data).unwrap();
    assert_eq!(parsed.len(), 12);
    assert_eq!(parsed[0].name, b"00");
    assert_eq!(parsed[10].name, b"10");
    assert_eq!(parsed[11].name, b"11");
}

#[test]
fn gitlink_entries_are_skipped_but_roundtrip() {
    let store = MemoryStore::new();
    let file = blob(&store, b"tracked");
    let submodule_commit = ObjectId::from_raw(&[0x42; 20]).unwrap();
    let plain_tree = tree(
        &store,
        &[
            ("100644", "a", file),
            ("160000", "vendor", submodule_commit),
        ],
    );
    let (_, plain_data) = store.read(&plain_tree).unwrap();
    let mut session = Session::new(store);

    let cipher_tree = session.encrypt_one(plain_tree);
    let (_, data) = session.store.read(&cipher_tree).unwrap();
    let entries = object::tree_entries(&data).unwrap();
    // One real entry plus the sentinel; the gitlink has no counterpart.
    assert_eq!(entries.len(), 2);

    let mut other = Session::new(session.store);
    assert_eq!(other.decrypt_one(cipher_tree), plain_tree);
    let (_, recovered) = other.store.read(&plain_tree).unwrap();
    assert_eq!(recovered, plain_data);
}

#[test]
fn cipher_commit_preserves_parent_count_and_order() {
    let store = MemoryStore::new();
    let file = blob(&store, b"data");
    let root = tree(&store, &[("100644", "f", file)]);
    let base = commit(&store, root, &[], "base");
    let side = commit(&store, root, &[base], "side");
    let merge = commit(&store, root, &[base, side], "merge");
    let mut session = Session::new(store);

    session.encrypt(&[merge]);
    let cipher_merge = session.partner(merge);
    let (_, data) = session.store.read(&cipher_merge).unwrap();
    let refs = object::commit_refs(&data).unwrap();
    assert_eq!(refs.len(), 3);
    assert_eq!(refs[0], session.partner(root));
    assert_eq!(refs[1], session.partner(base));
    assert_eq!(refs[2], session.partner(side));

    let text = String::from_utf8_lossy(&data).into_owned();
    assert!(text.starts_with(&format!(
        "tree {}\nparent {}\nparent {}\n",
        refs[0], refs[1], refs[2]
    )));
}

#[test]
fn full_graph_roundtrips_through_a_second_store() {
    let store = MemoryStore::new();
    let a = blob(&store, b"alpha");
    let b = blob(&store, b"beta");
    let bulk: Vec<u8> = (0..100_000).map(|_| rand::random::<u8>()).collect();
    let big = blob(&store, &bulk);
    let sub = tree(&store, &[("100644", "b", b), ("100644", "big", big)]);
    let root = tree(&store, &[("100644", "a", a), ("40000", "sub", sub)]);
    let first = commit(&store, root, &[], "first");
    let second = commit(&store, root, &[first], "second");

    let plain_ids = [a, b, big, sub, root, first, second];
    let mut plain_objects = Vec::new();
    for id in plain_ids {
        plain_objects.push(store.read(&id).unwrap());
    }

    let mut session = Session::new(store);
    session.encrypt(&[second, first]);
    let cipher_first = session.partner(first);
    let cipher_second = session.partner(second);

    // Ship the ciphertext graph into an empty store; every reference a
    // cipher object carries must resolve there.
    let remote = MemoryStore::new();
    transfer(&session.store, &remote, &[cipher_second, cipher_first]);

    let mut clone = Session::new(remote);
    clone.decrypt(&[cipher_second, cipher_first]);

    for (id, (kind, data)) in plain_ids.iter().zip(&plain_objects) {
        let (found_kind, found_data) = clone.store.read(id).unwrap();
        assert_eq!(found_kind, *kind);
        assert_eq!(&found_data, data);
    }
    assert_eq!(clone.partner(cipher_second), second);
    assert_eq!(clone.partner(second), cipher_second);
}

#[test]
fn encryption_is_deterministic_across_sessions() {
    let build = || {
        let store = MemoryStore::new();
        let file = blob(&store, b"stable");
        let root = tree(&store, &[("100644", "f", file)]);
        let tip = commit(&store, root, &[], "tip");
        (store, tip)
    };

    let (store_a, tip_a) = build();
    let (store_b, tip_b) = build();
    assert_eq!(tip_a, tip_b);

    let mut one = Session::new(store_a);
    let mut two = Session::new(store_b);
    assert_eq!(one.encrypt_one(tip_a), two.encrypt_one(tip_b));
}

#[test]
fn repeated_encrypt_reuses_translations() {
    let store = MemoryStore::new();
    let file = blob(&store, b"data");
    let root = tree(&store, &[("100644", "f", file)]);
    let tip = commit(&store, root, &[], "tip");
    let mut session = Session::new(store);

    session.encrypt(&[tip]);
    let fresh = session
        .counters
        .encrypted_objects
        .load(std::sync::atomic::Ordering::Relaxed);
    assert_eq!(fresh, 3); // blob, tree, commit; the sentinel blob rides with the tree

    session.encrypt(&[tip]);
    let after = session
        .counters
        .encrypted_objects
        .load(std::sync::atomic::Ordering::Relaxed);
    assert_eq!(fresh, after);
}

#[test]
fn deep_history_does_not_recurse() {
    let store = MemoryStore::new();
    let file = blob(&store, b"leaf");
    let root = tree(&store, &[("100644", "f", file)]);
    let mut tip = commit(&store, root, &[], "commit 0");
    for i in 1..500 {
        tip = commit(&store, root, &[tip], &format!("commit {i}"));
    }
    let mut session = Session::new(store);
    let cipher_tip = session.encrypt_one(tip);

    let remote = MemoryStore::new();
    transfer(&session.store, &remote, &[cipher_tip]);

    // The driver feeds every commit as a root; walk the cipher parents.
    let mut roots = Vec::new();
    let mut cursor = cipher_tip;
    loop {
        roots.push(cursor);
        let (_, data) = remote.read(&cursor).unwrap();
        let refs = object::commit_refs(&data).unwrap();
        match refs.get(1) {
            Some(parent) => cursor = *parent,
            None => break,
        }
    }
    assert_eq!(roots.len(), 500);

    let mut clone = Session::new(remote);
    clone.decrypt(&roots);
    assert_eq!(clone.partner(cipher_tip), tip);
}

#[test]
fn shared_subtrees_translate_once() {
    let store = MemoryStore::new();
    let shared = blob(&store, b"shared data");
    let left = tree(&store, &[("100644", "l", shared)]);
    let right = tree(&store, &[("100644", "r", shared)]);
    let root = tree(
        &store,
        &[("40000", "left", left), ("40000", "right", right)],
    );
    let tip = commit(&store, root, &[], "diamond");
    let mut session = Session::new(store);

    session.encrypt(&[tip]);
    let cipher_left = session.partner(left);
    let cipher_right = session.partner(right);
    let (_, left_data) = session.store.read(&cipher_left).unwrap();
    let (_, right_data) = session.store.read(&cipher_right).unwrap();
    let shared_cipher = session.partner(shared);
    assert_eq!(object::tree_entries(&left_data).unwrap()[0].id, shared_cipher);
    assert_eq!(object::tree_entries(&right_data).unwrap()[0].id, shared_cipher);
}

#[test]
fn oid_map_survives_sessions() {
    let store = MemoryStore::new();
    let plain = blob(&store, b"persisted");

    let dir = TempDir::new().unwrap();
    let password = Password::derive("psw:hunter2").unwrap();
    let counters = Counters::default();

    let mut codec = Codec::new(&password);
    let mut omp = OidMap::new(dir.path(), "origin", &password);
    let cipher = Encryptor::new(&store, &mut codec, &mut omp, &counters)
        .translate(plain)
        .unwrap();
    omp.store().unwrap();

    let mut reloaded = OidMap::new(dir.path(), "origin", &password);
    reloaded.load().unwrap();
    assert_eq!(reloaded.find(&plain, &store), Some(cipher));
    assert_eq!(reloaded.find(&cipher, &store), Some(plain));
}
