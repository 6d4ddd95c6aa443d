//! The remote-helper protocol loop.
//!
//! git launches us with `GIT_DIR` set and speaks a line-oriented protocol on
//! stdin/stdout: `capabilities`, `list [for-push]`, batches of `fetch` or
//! `push` lines terminated by a blank line, and a final blank line to quit.
//! Everything the remote ever receives is ciphertext; the translation
//! between the two graphs happens here, around the actual transfers.

use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result};
use git2::{Direction, FetchOptions, Oid, PushOptions, RemoteCallbacks, Repository};
use tracing::debug;
use xcrypt_protocol::{Error, ObjectId};
use xcrypt_sdk::counters::Counters;
use xcrypt_sdk::crypto::Codec;
use xcrypt_sdk::decrypt::Decryptor;
use xcrypt_sdk::encrypt::Encryptor;
use xcrypt_sdk::omp::OidMap;
use xcrypt_sdk::store::ObjectStore;

use crate::creds;
use crate::gitdb::{from_git_oid, to_git_oid, GitStore};
use crate::progress;
use crate::secret;

pub fn run(git_dir: &Path, remote_name: &str, remote_url: &str) -> Result<()> {
    debug!("GIT_DIR = {}", git_dir.display());
    let repo = Repository::open(git_dir).context("failed to open repository")?;
    let password = secret::load_password(&repo, remote_name)?;

    let mut omp = OidMap::new(repo.path(), remote_name, &password);
    omp.load()?;

    let mut helper = Helper {
        store: GitStore::new(repo.odb()?),
        repo: &repo,
        codec: Codec::new(&password),
        omp,
        counters: Counters::default(),
        remote_name: remote_name.to_string(),
        remote_url: remote_url.to_string(),
    };

    let served = helper.serve();
    // Pairs translated before a failure are still worth keeping.
    let stored = helper.omp.store();
    helper.counters.report();
    served.and(stored)
}

struct RemoteHead {
    oid: Oid,
    name: String,
    symref_target: Option<String>,
}

struct Helper<'repo> {
    repo: &'repo Repository,
    store: GitStore<'repo>,
    codec: Codec,
    omp: OidMap,
    counters: Counters,
    remote_name: String,
    remote_url: String,
}

struct PushSpec {
    force: bool,
    src_oid: Option<Oid>,
    dst: String,
}

impl Helper<'_> {
    fn serve(&mut self) -> Result<()> {
        loop {
            let Some(args) = read_command()? else { break };
            let Some(command) = args.first().cloned() else {
                break;
            };
            match command.as_str() {
                "capabilities" => self.capabilities()?,
                "list" => self.list(args.get(1).is_some_and(|arg| arg == "for-push"))?,
                "fetch" => self.fetch(args)?,
                "push" => self.push(args)?,
                other => {
                    return Err(Error::Protocol(format!("unknown command `{other}`")).into());
                }
            }
        }
        Ok(())
    }

    fn capabilities(&self) -> Result<()> {
        output("fetch")?;
        output("push")?;
        output_blank()
    }

    /// `list` / `list for-push`: advertise the remote's refs translated to
    /// their plaintext ids, fetching and decrypting whatever that takes.
    fn list(&mut self, for_push: bool) -> Result<()> {
        let direction = if for_push {
            Direction::Push
        } else {
            Direction::Fetch
        };

        let mut remote = self.repo.remote_anonymous(&self.remote_url)?;
        let heads: Vec<RemoteHead> = {
            let connection = remote
                .connect_auth(direction, Some(base_callbacks()), None)
                .map_err(|err| Error::Transport(format!("connect failed: {err}")))?;
            connection
                .list()
                .map_err(|err| Error::Transport(format!("ls-refs failed: {err}")))?
                .iter()
                .map(|head| RemoteHead {
                    oid: head.oid(),
                    name: head.name().to_string(),
                    symref_target: head.symref_target().map(String::from),
                })
                .collect()
        };

        self.fetch_missing(&heads)?;
        self.decrypt_heads(&heads)?;
        self.emit_list(&heads)
    }

    /// Downloads ciphertext for advertised heads the local store lacks. The
    /// listing connection may be push-directed, and the remote's receive
    /// side cannot serve objects, so downloads get their own connection.
    fn fetch_missing(&mut self, heads: &[RemoteHead]) -> Result<()> {
        let needed: Vec<&str> = heads
            .iter()
            .filter(|head| {
                head.symref_target.is_none() && !self.store.exists(&from_git_oid(head.oid))
            })
            .map(|head| head.name.as_str())
            .collect();
        if needed.is_empty() {
            return Ok(());
        }

        let mut remote = self.repo.remote_anonymous(&self.remote_url)?;
        let mut options = FetchOptions::new();
        options.remote_callbacks(base_callbacks());
        remote
            .download(&needed, Some(&mut options))
            .map_err(|err| Error::Transport(format!("download failed: {err}")))?;
        remote.disconnect()?;
        Ok(())
    }

    /// Walks the freshly fetched ciphertext commits and decrypts them,
    /// skipping history already covered by our bookkeeping refs.
    fn decrypt_heads(&mut self, heads: &[RemoteHead]) -> Result<()> {
        let mut walk = self.repo.revwalk()?;
        let mut any = false;
        for head in heads {
            if !head.oid.is_zero() {
                walk.push(head.oid)?;
                any = true;
            }
        }
        if !any {
            return Ok(());
        }
        walk.hide_glob(&format!("refs/xcrypt/remotes/{}", self.remote_name))?;

        let mut roots = Vec::new();
        for oid in walk {
            roots.push(from_git_oid(oid?));
        }
        Decryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters).run(roots)
    }

    fn emit_list(&mut self, heads: &[RemoteHead]) -> Result<()> {
        for head in heads {
            if let Some(target) = &head.symref_target {
                output(&format!("@{target} {}", head.name))?;
                continue;
            }

            let ref_name = self.xcrypt_remote_ref(&head.name);
            self.repo
                .reference(&ref_name, head.oid, true, "xcrypt remote head")?;
            debug!("xcrypt remote  {} {}", head.oid, ref_name);

            let cipher = from_git_oid(head.oid);
            let plain = match self.omp.find(&cipher, &self.store) {
                Some(plain) => plain,
                None => Decryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters)
                    .translate(cipher)?,
            };
            output(&format!("{plain} {}", head.name))?;
        }
        output_blank()
    }

    /// `fetch <sha> <name>` batch. The objects were already materialized
    /// during `list`, so each line only asserts local existence.
    fn fetch(&mut self, mut args: Vec<String>) -> Result<()> {
        loop {
            let sha = args
                .get(1)
                .ok_or_else(|| Error::Protocol("fetch without object id".into()))?;
            let id = ObjectId::from_hex(sha)
                .map_err(|_| Error::Protocol(format!("malformed object id `{sha}`")))?;
            if !self.store.exists(&id) {
                return Err(Error::Store(format!("object {id} missing after list")).into());
            }
            match read_command()? {
                Some(next) if !next.is_empty() => args = next,
                _ => break,
            }
        }
        output_blank()
    }

    /// `push [+]<src>:<dst>` batch: encrypt everything reachable from the
    /// sources minus what the remote is known to have, then upload the
    /// ciphertext tips under throwaway local refs.
    fn push(&mut self, mut args: Vec<String>) -> Result<()> {
        let mut specs = Vec::new();
        let mut walk = self.repo.revwalk()?;
        loop {
            let refspec = args
                .get(1)
                .ok_or_else(|| Error::Protocol("push without refspec".into()))?;
            let (force, spec) = match refspec.strip_prefix('+') {
                Some(rest) => (true, rest),
                None => (false, refspec.as_str()),
            };
            let (src, dst) = spec
                .split_once(':')
                .filter(|(_, dst)| !dst.is_empty())
                .ok_or_else(|| Error::Protocol(format!("malformed refspec `{refspec}`")))?;

            let src_oid = if src.is_empty() {
                None
            } else {
                let oid = self.repo.revparse_single(src)?.id();
                walk.push(oid)?;
                Some(oid)
            };
            debug!("push hash      {}{src}:{dst}", if force { "+" } else { "" });
            specs.push(PushSpec {
                force,
                src_oid,
                dst: dst.to_string(),
            });

            match read_command()? {
                Some(next) if !next.is_empty() => args = next,
                _ => break,
            }
        }

        // Subtract commits the remote already has.
        walk.hide_glob(&format!("refs/remotes/{}", self.remote_name))?;
        let mut roots = Vec::new();
        for oid in walk {
            roots.push(from_git_oid(oid?));
        }
        Encryptor::new(&self.store, &mut self.codec, &mut self.omp, &self.counters).run(roots)?;

        let mut refspecs = Vec::new();
        for spec in &specs {
            let Some(src_oid) = spec.src_oid else {
                refspecs.push(format!(":{}", spec.dst));
                continue;
            };
            let cipher = self
                .omp
                .find(&from_git_oid(src_oid), &self.store)
                .context("push source was not encrypted")?;
            let local_ref = xcrypt_local_ref(&spec.dst);
            self.repo
                .reference(&local_ref, to_git_oid(&cipher)?, true, "xcrypt push")?;
            let force = if spec.force { "+" } else { "" };
            debug!("push encrypt   {force}{cipher}:{}", spec.dst);
            refspecs.push(format!("{force}{local_ref}:{}", spec.dst));
        }

        let mut callbacks = base_callbacks();
        callbacks.pack_progress(progress::pack);
        callbacks.push_transfer_progress(progress::push_transfer);
        let repo = self.repo;
        let remote_name = self.remote_name.clone();
        callbacks.push_update_reference(move |refname, status| {
            if let Some(message) = status {
                return Err(git2::Error::from_str(&format!(
                    "update of {refname} rejected: {message}"
                )));
            }
            output(&format!("ok {refname}")).map_err(to_git_error)?;
            confirm_ref_update(repo, &remote_name, refname).map_err(to_git_error)
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);
        let mut remote = self.repo.remote_anonymous(&self.remote_url)?;
        let refspecs: Vec<&str> = refspecs.iter().map(String::as_str).collect();
        remote
            .push(&refspecs, Some(&mut options))
            .map_err(|err| Error::Transport(format!("push failed: {err}")))?;

        output_blank()
    }

    fn xcrypt_remote_ref(&self, name: &str) -> String {
        format!(
            "refs/xcrypt/remotes/{}/{}",
            self.remote_name,
            strip_refs(name)
        )
    }
}

/// The remote confirmed an update of `refname`: move the throwaway local
/// ref to the remote-tracking position. A missing local ref means the
/// refspec was a deletion; drop the tracking ref instead.
fn confirm_ref_update(repo: &Repository, remote_name: &str, refname: &str) -> Result<()> {
    let local_ref = xcrypt_local_ref(refname);
    let remote_ref = format!("refs/xcrypt/remotes/{remote_name}/{}", strip_refs(refname));
    match repo.find_reference(&local_ref) {
        Ok(mut reference) => {
            reference.rename(&remote_ref, true, "xcrypt push")?;
        }
        Err(_) => {
            if let Ok(mut reference) = repo.find_reference(&remote_ref) {
                reference.delete()?;
            }
        }
    }
    Ok(())
}

fn xcrypt_local_ref(name: &str) -> String {
    format!("refs/xcrypt/local/{}", strip_refs(name))
}

fn strip_refs(name: &str) -> &str {
    name.strip_prefix("refs/").unwrap_or(name)
}

fn base_callbacks<'cb>() -> RemoteCallbacks<'cb> {
    let mut callbacks = RemoteCallbacks::new();
    creds::install(&mut callbacks);
    callbacks.sideband_progress(|data| {
        eprint!("remote: {}", String::from_utf8_lossy(data));
        true
    });
    callbacks.transfer_progress(|stats| progress::transfer(&stats));
    callbacks
}

fn to_git_error(err: anyhow::Error) -> git2::Error {
    git2::Error::from_str(&err.to_string())
}

/// Reads one protocol line and splits it on whitespace. `None` is end of
/// input; an empty vector is a blank line.
fn read_command() -> Result<Option<Vec<String>>> {
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line)?;
    if read == 0 {
        return Ok(None);
    }
    debug!("input  : {}", line.trim_end());
    Ok(Some(line.split_whitespace().map(String::from).collect()))
}

fn output(line: &str) -> Result<()> {
    debug!("output : {line}");
    let mut stdout = io::stdout().lock();
    stdout.write_all(line.as_bytes())?;
    stdout.write_all(b"\n")?;
    Ok(())
}

fn output_blank() -> Result<()> {
    debug!("output :");
    let mut stdout = io::stdout().lock();
    stdout.write_all(b"\n")?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_names_drop_the_refs_prefix() {
        assert_eq!(strip_refs("refs/heads/main"), "heads/main");
        assert_eq!(strip_refs("heads/main"), "heads/main");
        assert_eq!(
            xcrypt_local_ref("refs/heads/main"),
            "refs/xcrypt/local/heads/main"
        );
    }
}
