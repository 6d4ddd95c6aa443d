//! Parsing and assembly of commit and tree bodies.
//!
//! Only the pieces the graph walkers need: the reference lines at the head
//! of a commit, raw tree entries, and the 64-column base64 folding used for
//! ciphertext commit payloads.

use anyhow::Result;
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use xcrypt_protocol::{Error, ObjectId};

/// Tree entry mode of a submodule (gitlink). Such entries carry no edge in
/// the object graph and are left alone by both translation directions.
pub const GITLINK_MODE: u32 = 0o160000;

/// Mode of the sentinel entry appended to every ciphertext tree.
pub(crate) const SENTINEL_MODE: &[u8] = b"100664";

/// Fixed identity block of every ciphertext commit. A constant author and
/// timestamp keep the ciphertext graph reproducible across clones.
pub(crate) const AUTHOR_BLOCK: &[u8] = b"author git-remote-xcrypt <xxw_pc@163.com> 1713075873 +0800\n\
committer git-remote-xcrypt <xxw_pc@163.com> 1713075873 +0800\n\n";

/// Ciphertext bytes per base64 line; 48 bytes encode to 64 characters.
const LINE_INPUT_LEN: usize = 48;
const LINE_LEN: usize = 64;

pub struct TreeEntry<'a> {
    pub mode: u32,
    /// Octal mode text exactly as stored, without the separating space.
    pub mode_raw: &'a [u8],
    pub name: &'a [u8],
    pub id: ObjectId,
}

/// Parses the raw entry list of a tree body:
/// `<octal mode> <name>\0<20 raw id bytes>`, repeated.
pub fn tree_entries(data: &[u8]) -> Result<Vec<TreeEntry<'_>>> {
    let mut entries = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| corrupt("tree entry without mode"))?;
        let mode_raw = &rest[..space];
        let mode = u32::from_str_radix(std::str::from_utf8(mode_raw)?, 8)
            .map_err(|_| corrupt("tree entry mode is not octal"))?;

        let after_mode = &rest[space + 1..];
        let nul = after_mode
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| corrupt("tree entry without name terminator"))?;
        let name = &after_mode[..nul];

        let id_at = nul + 1;
        if after_mode.len() < id_at + ObjectId::SHORT_LEN {
            return Err(corrupt("tree entry truncated"));
        }
        let id = ObjectId::from_raw(&after_mode[id_at..id_at + ObjectId::SHORT_LEN])?;

        entries.push(TreeEntry {
            mode,
            mode_raw,
            name,
            id,
        });
        rest = &after_mode[id_at + ObjectId::SHORT_LEN..];
    }
    Ok(entries)
}

/// Extracts the reference list of a commit body: the tree id first, then
/// every parent id, in the order the header lines carry them.
pub fn commit_refs(data: &[u8]) -> Result<Vec<ObjectId>> {
    let rest = data
        .strip_prefix(b"tree ")
        .ok_or_else(|| corrupt("commit does not start with a tree line"))?;
    let (tree, mut rest) = take_hex_id(rest)?;

    let mut refs = vec![tree];
    while let Some(after) = rest.strip_prefix(b"parent ") {
        let (parent, remaining) = take_hex_id(after)?;
        refs.push(parent);
        rest = remaining;
    }
    Ok(refs)
}

fn take_hex_id(data: &[u8]) -> Result<(ObjectId, &[u8])> {
    if data.len() < ObjectId::HEX_LEN + 1 || data[ObjectId::HEX_LEN] != b'\n' {
        return Err(corrupt("malformed reference line"));
    }
    let id = ObjectId::from_hex(std::str::from_utf8(&data[..ObjectId::HEX_LEN])?)?;
    Ok((id, &data[ObjectId::HEX_LEN + 1..]))
}

/// The payload of a ciphertext commit: everything after the first blank line.
pub fn commit_payload(data: &[u8]) -> Result<&[u8]> {
    let blank = data
        .windows(2)
        .position(|pair| pair == b"\n\n")
        .ok_or_else(|| corrupt("commit without blank line"))?;
    Ok(&data[blank + 2..])
}

/// Assembles a ciphertext commit body: rewritten reference lines, the fixed
/// identity block, then the folded base64 payload.
pub fn build_cipher_commit(refs: &[ObjectId], ciphertext: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b"tree ");
    out.extend_from_slice(refs[0].to_hex().as_bytes());
    out.push(b'\n');
    for parent in &refs[1..] {
        out.extend_from_slice(b"parent ");
        out.extend_from_slice(parent.to_hex().as_bytes());
        out.push(b'\n');
    }
    out.extend_from_slice(AUTHOR_BLOCK);
    fold_base64(ciphertext, out);
}

/// Encodes `data` as base64, 64 characters per line; the final line keeps
/// whatever length remains and carries no trailing newline.
pub fn fold_base64(data: &[u8], out: &mut Vec<u8>) {
    let mut rest = data;
    while rest.len() > LINE_INPUT_LEN {
        let (line, tail) = rest.split_at(LINE_INPUT_LEN);
        out.extend_from_slice(BASE64_STANDARD.encode(line).as_bytes());
        out.push(b'\n');
        rest = tail;
    }
    out.extend_from_slice(BASE64_STANDARD.encode(rest).as_bytes());
}

/// Inverts [`fold_base64`]. Every full line must be exactly 64 characters
/// plus a newline; the final line must be a multiple of four characters.
pub fn unfold_base64(data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < LINE_LEN {
        return Err(corrupt("base64 payload too short"));
    }
    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    let mut rest = data;
    while rest.len() > LINE_LEN {
        if rest[LINE_LEN] != b'\n' {
            return Err(corrupt("unfolded base64 line"));
        }
        let line = BASE64_STANDARD
            .decode(&rest[..LINE_LEN])
            .map_err(|_| corrupt("invalid base64 line"))?;
        if line.len() != LINE_INPUT_LEN {
            return Err(corrupt("short base64 line"));
        }
        out.extend_from_slice(&line);
        rest = &rest[LINE_LEN + 1..];
    }
    if rest.len() % 4 != 0 {
        return Err(corrupt("ragged base64 tail"));
    }
    let tail = BASE64_STANDARD
        .decode(rest)
        .map_err(|_| corrupt("invalid base64 tail"))?;
    out.extend_from_slice(&tail);
    Ok(out)
}

fn corrupt(message: &str) -> anyhow::Error {
    Error::Corruption(message.into()).into()
}
