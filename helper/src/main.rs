use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use git_remote_xcrypt::cli::Cli;
use git_remote_xcrypt::{commands, helper, setup_logger};

fn main() -> Result<()> {
    setup_logger()?;

    if env::var_os("XCRYPT_DEBUG").is_some() {
        // Window for attaching a debugger before anything happens.
        thread::sleep(Duration::from_secs(40));
    }

    // git sets GIT_DIR when it launches us as a remote helper; without it
    // we are being run by a person.
    if let Some(git_dir) = env::var_os("GIT_DIR") {
        let args: Vec<String> = env::args().skip(1).collect();
        let [remote_name, remote_url] = args.as_slice() else {
            bail!(
                "expected <remote-name> <remote-url>, got {} arguments",
                args.len()
            );
        };
        return helper::run(git_dir.as_ref(), remote_name, remote_url);
    }

    commands::run(Cli::parse())
}
