use std::collections::VecDeque;
use std::env;
use std::path::PathBuf;

use git2::{Cred, CredentialType, RemoteCallbacks};

/// Private keys tried in order before falling back to default credentials.
const KEY_NAMES: &[&str] = &[
    "id_rsa",
    "id_ecdsa",
    "id_ecdsa_sk",
    "id_ed25519",
    "id_ed25519_sk",
];

fn ssh_key_candidates() -> VecDeque<PathBuf> {
    let Some(home) = env::var_os("HOME") else {
        return VecDeque::new();
    };
    let ssh_dir = PathBuf::from(home).join(".ssh");
    KEY_NAMES.iter().map(|name| ssh_dir.join(name)).collect()
}

/// Installs the credential chain: each existing `~/.ssh` key is offered
/// once, then default credentials. The transport calls back again after
/// every rejected credential, so the candidate list lives in the closure.
pub fn install(callbacks: &mut RemoteCallbacks<'_>) {
    let mut keys = ssh_key_candidates();
    callbacks.credentials(move |url, username_from_url, allowed| {
        let username = username_from_url.unwrap_or("git");
        if allowed.contains(CredentialType::SSH_KEY) {
            while let Some(path) = keys.pop_front() {
                if path.exists() {
                    return Cred::ssh_key(username, None, &path, None);
                }
            }
        }
        if allowed.contains(CredentialType::DEFAULT) {
            return Cred::default();
        }
        Err(git2::Error::from_str(&format!(
            "no usable credentials for `{url}`"
        )))
    });
}
