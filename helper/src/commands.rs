use std::io::ErrorKind;

use anyhow::{bail, ensure, Context, Result};
use git2::Repository;
use tracing::debug;
use xcrypt_protocol::Password;
use xcrypt_sdk::counters::Counters;
use xcrypt_sdk::crypto::Codec;
use xcrypt_sdk::decrypt::Decryptor;
use xcrypt_sdk::encrypt::Encryptor;
use xcrypt_sdk::omp::OidMap;

use crate::cli::{Cli, Command};
use crate::gitdb::{from_git_oid, GitStore};
use crate::secret;

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Add {
            name,
            url,
            secret,
            args,
        } => add(&name, &url, &secret, &args),
        Command::Clear { name } => clear(&name),
        Command::Clone {
            name,
            url,
            secret,
            args,
        } => clone(&name, &url, &secret, &args),
        Command::Set { name, secret, url } => set(&name, secret.as_deref(), url.as_deref()),
        Command::Encrypt { name, object } => translate(&name, &object, false),
        Command::Decrypt { name, object } => translate(&name, &object, true),
    }
}

/// Prepends the helper's url scheme when the user left it off.
fn xcrypt_url(url: &str) -> String {
    if url.starts_with("xcrypt::") {
        url.to_string()
    } else {
        format!("xcrypt::{url}")
    }
}

/// `git remote add` does the actual remote setup so its options pass
/// through untouched; the secret lands in git config afterwards.
fn add(name: &str, url: &str, secret: &str, extra: &[String]) -> Result<()> {
    Password::derive(secret)?;
    let status = std::process::Command::new("git")
        .arg("remote")
        .arg("add")
        .args(extra)
        .arg(name)
        .arg(xcrypt_url(url))
        .status()
        .context("failed to run git remote add")?;
    ensure!(status.success(), "git remote add failed: {status}");

    let repo = Repository::discover(".")?;
    repo.config()?.set_str(&secret::config_key(name), secret)?;
    Ok(())
}

fn set(name: &str, secret: Option<&str>, url: Option<&str>) -> Result<()> {
    let repo = Repository::discover(".")?;
    repo.find_remote(name)
        .with_context(|| format!("no remote named `{name}`"))?;
    if let Some(secret) = secret {
        Password::derive(secret)?;
        repo.config()?.set_str(&secret::config_key(name), secret)?;
    }
    if let Some(url) = url {
        repo.remote_set_url(name, &xcrypt_url(url))?;
    }
    Ok(())
}

/// Drops everything cached for a remote: the oid map file plus the ordinary
/// and xcrypt remote-tracking refs. The next `list` rebuilds all of it.
fn clear(name: &str) -> Result<()> {
    let repo = Repository::discover(".")?;
    repo.find_remote(name)
        .with_context(|| format!("no remote named `{name}`"))?;

    let map_path = OidMap::file_path(repo.path(), name);
    debug!("delete oid map : {}", map_path.display());
    match fs_err::remove_file(&map_path) {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }

    delete_refs(&repo, &format!("refs/remotes/{name}/*"))?;
    delete_refs(&repo, &format!("refs/xcrypt/remotes/{name}/*"))?;
    Ok(())
}

fn delete_refs(repo: &Repository, glob: &str) -> Result<()> {
    let names: Vec<String> = repo
        .references_glob(glob)?
        .filter_map(|reference| {
            reference
                .ok()
                .and_then(|reference| reference.name().map(String::from))
        })
        .collect();
    for name in names {
        debug!("delete ref : {name}");
        repo.find_reference(&name)?.delete()?;
    }
    Ok(())
}

/// `git clone` does the heavy lifting; we hand it the secret through
/// `--config` so the helper finds it on its very first invocation.
fn clone(name: &str, url: &str, secret: &str, extra: &[String]) -> Result<()> {
    Password::derive(secret)?;
    for arg in extra {
        if arg == "-o" || arg.starts_with("--origin") {
            bail!("cannot use option `{arg}`; the name argument selects the origin");
        }
    }
    // Arguments after `--` (the target directory) belong after the url.
    let (options, trailing) = match extra.iter().position(|arg| arg == "--") {
        Some(position) => (&extra[..position], &extra[position + 1..]),
        None => (extra, &extra[..0]),
    };

    let status = std::process::Command::new("git")
        .arg("clone")
        .arg("--config")
        .arg(format!("{}={secret}", secret::config_key(name)))
        .arg("--origin")
        .arg(name)
        .args(options)
        .arg(xcrypt_url(url))
        .args(trailing)
        .status()
        .context("failed to run git clone")?;
    ensure!(status.success(), "git clone failed: {status}");
    Ok(())
}

/// Debug surface: translate one object graph in either direction and print
/// the id before and after.
fn translate(name: &str, spec: &str, decrypt: bool) -> Result<()> {
    let repo = Repository::discover(".")?;
    let password = secret::load_password(&repo, name)?;
    let store = GitStore::new(repo.odb()?);
    let mut omp = OidMap::new(repo.path(), name, &password);
    omp.load()?;
    let mut codec = Codec::new(&password);
    let counters = Counters::default();

    let id = from_git_oid(repo.revparse_single(spec)?.id());
    println!("{id}");
    let translated = if decrypt {
        Decryptor::new(&store, &mut codec, &mut omp, &counters).translate(id)?
    } else {
        Encryptor::new(&store, &mut codec, &mut omp, &counters).translate(id)?
    };
    println!("{translated}");

    omp.store()?;
    counters.report();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_prefix_is_added_once() {
        assert_eq!(xcrypt_url("host:repo.git"), "xcrypt::host:repo.git");
        assert_eq!(xcrypt_url("xcrypt::host:repo.git"), "xcrypt::host:repo.git");
    }
}
