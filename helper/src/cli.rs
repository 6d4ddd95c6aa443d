use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "git-remote-xcrypt")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Add an encrypted remote and store its secret key.
    Add {
        name: String,
        url: String,
        secret: String,
        /// Extra arguments passed through to `git remote add`.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Remove cached state for a remote: the oid map and tracking refs.
    Clear { name: String },
    /// Clone an encrypted repository.
    Clone {
        name: String,
        url: String,
        secret: String,
        /// Extra arguments passed through to `git clone`; a trailing
        /// `-- <dir>` selects the target directory.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Update the secret key or url of an encrypted remote.
    Set {
        name: String,
        #[arg(short = 'p', long = "password")]
        secret: Option<String>,
        #[arg(short = 'u', long)]
        url: Option<String>,
    },
    /// Encrypt one object graph and print the id before and after.
    #[command(hide = true)]
    Encrypt { name: String, object: String },
    /// Decrypt one object graph and print the id before and after.
    #[command(hide = true)]
    Decrypt { name: String, object: String },
}
