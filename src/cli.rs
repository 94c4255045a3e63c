use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sshmate::model::DEFAULT_SSH_PORT;

/// Manage named SSH servers: open shells, run commands, move files.
#[derive(Debug, Parser)]
#[command(name = "sshmate", version)]
pub struct Args {
    /// Path to the server list (default: <config dir>/sshmate/servers.json).
    #[arg(short = 'c', long = "config", global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Save a new server profile.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        host: String,
        #[arg(short = 'p', long, default_value_t = DEFAULT_SSH_PORT)]
        port: u16,
        #[arg(short = 'u', long)]
        username: String,
        /// Prompted for without echo when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// Show saved servers.
    List,
    /// Delete a saved server.
    Remove {
        name: String,
        /// Skip the confirmation prompt.
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Check that a server accepts the stored credentials.
    Test { name: String },
    /// Open an interactive shell, in a new terminal tab when possible.
    Connect {
        name: String,
        /// Run the shell in this terminal.
        #[arg(long = "no-new-tab")]
        no_new_tab: bool,
    },
    /// Run a command and stream its output.
    Exec {
        name: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Copy files over SFTP.
    #[command(subcommand)]
    Transfer(TransferCommand),
}

#[derive(Debug, Subcommand)]
pub enum TransferCommand {
    /// Upload a file or directory tree.
    Upload {
        name: String,
        local: PathBuf,
        remote: String,
    },
    /// Download a remote file or directory tree.
    Download {
        name: String,
        remote: String,
        local: PathBuf,
    },
    /// List a remote directory.
    Ls {
        name: String,
        #[arg(default_value = ".")]
        remote: String,
    },
    /// Remove a remote file or empty directory.
    Rm { name: String, remote: String },
}

impl TransferCommand {
    pub fn server(&self) -> &str {
        match self {
            Self::Upload { name, .. }
            | Self::Download { name, .. }
            | Self::Ls { name, .. }
            | Self::Rm { name, .. } => name,
        }
    }
}
