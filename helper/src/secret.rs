use anyhow::Result;
use git2::Repository;
use xcrypt_protocol::{Error, Password};

pub fn config_key(remote_name: &str) -> String {
    format!("remote.{remote_name}.xcrypt-secret-key")
}

pub fn load_password(repo: &Repository, remote_name: &str) -> Result<Password> {
    let mut config = repo.config()?;
    let secret = config.snapshot()?.get_string(&config_key(remote_name)).map_err(|_| {
        Error::ConfigMissing(format!("no secret key configured for remote `{remote_name}`"))
    })?;
    Ok(Password::derive(&secret)?)
}
