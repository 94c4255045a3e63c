mod cli;

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use sshmate::config::{config_path, ProfileStore};
use sshmate::error::SshError;
use sshmate::exec::Executor;
use sshmate::logger;
use sshmate::model::HostProfile;
use sshmate::ssh::{test_connection, Session};
use sshmate::transfer::{RemoteEntry, Transfer, TransferSummary};
use tracing::{error, info, warn};

use crate::cli::{Args, Command, TransferCommand};

fn main() -> ExitCode {
    let args = Args::parse();
    logger::init(logger::default_log_path());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("error: {err:#}");
            match remote_exit_code(&err) {
                Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(u8::MAX)),
                None => ExitCode::FAILURE,
            }
        }
    }
}

/// The remote command's own exit status, when that is why we failed.
fn remote_exit_code(err: &anyhow::Error) -> Option<u32> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SshError>())
        .and_then(SshError::exit_code)
}

async fn run(args: Args) -> anyhow::Result<()> {
    let store = ProfileStore::new(config_path(args.config.as_deref()));
    match args.command {
        Command::Add {
            name,
            host,
            port,
            username,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => rpassword::prompt_password("Password: ")
                    .context("failed to read password")?,
            };
            store.add(HostProfile::new(name.clone(), host, port, username, password))?;
            info!("added server {name}");
            println!("Added server '{name}'.");
        }
        Command::List => print_servers(&store.list()?),
        Command::Remove { name, yes } => {
            store.get(&name)?;
            if !yes && !confirm(&format!("Remove server '{name}'?"))? {
                println!("Cancelled.");
                return Ok(());
            }
            store.remove(&name)?;
            info!("removed server {name}");
            println!("Removed server '{name}'.");
        }
        Command::Test { name } => {
            let profile = store.get(&name)?;
            test_connection(&profile)
                .await
                .with_context(|| format!("server '{name}' is not reachable"))?;
            println!("Connection to '{name}' ({}) succeeded.", profile.address());
        }
        Command::Connect { name, no_new_tab } => {
            let mut session = Session::new(store.get(&name)?);
            let result = Executor::new(&mut session)
                .execute_shell(!no_new_tab)
                .await;
            close_session(&mut session).await;
            result.with_context(|| format!("shell on '{name}' failed"))?;
        }
        Command::Exec { name, command } => {
            let mut session = Session::new(store.get(&name)?);
            let result = Executor::new(&mut session)
                .execute_with_stream(&command.join(" "))
                .await;
            close_session(&mut session).await;
            result?;
        }
        Command::Transfer(cmd) => run_transfer(&store, cmd).await?,
    }
    Ok(())
}

async fn run_transfer(store: &ProfileStore, cmd: TransferCommand) -> anyhow::Result<()> {
    let name = cmd.server().to_string();
    let mut session = Session::new(store.get(&name)?);
    let transfer = Transfer::open(&mut session)
        .await
        .with_context(|| format!("failed to open SFTP on '{name}'"))?;

    let result = match cmd {
        TransferCommand::Upload { local, remote, .. } => transfer
            .upload_auto(&local, &remote)
            .await
            .map(|summary| print_summary("Uploaded", &summary)),
        TransferCommand::Download { remote, local, .. } => transfer
            .download_auto(&remote, &local)
            .await
            .map(|summary| print_summary("Downloaded", &summary)),
        TransferCommand::Ls { remote, .. } => transfer
            .list_remote(&remote)
            .await
            .map(|entries| print_entries(&entries)),
        TransferCommand::Rm { remote, .. } => transfer.remove_remote(&remote).await.map(|()| {
            println!("Removed {remote}.");
        }),
    };

    if let Err(err) = transfer.close().await {
        warn!("closing SFTP on {name}: {err}");
    }
    close_session(&mut session).await;
    Ok(result?)
}

async fn close_session(session: &mut Session) {
    if let Err(err) = session.close().await {
        warn!("closing session to {}: {err}", session.profile().name);
    }
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] ");
    io::stdout().flush()?;
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer)? == 0 {
        bail!("no answer on stdin; pass --yes to skip confirmation");
    }
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

fn print_servers(servers: &[HostProfile]) {
    if servers.is_empty() {
        println!("No servers configured. Add one with `sshmate add`.");
        return;
    }
    let width = servers.iter().map(|s| s.name.len()).max().unwrap_or(0).max(4);
    println!("{:<width$}  {:<24}  {:>5}  USER", "NAME", "HOST", "PORT");
    for server in servers {
        println!(
            "{:<width$}  {:<24}  {:>5}  {}",
            server.name, server.host, server.port, server.username
        );
    }
}

fn print_entries(entries: &[RemoteEntry]) {
    for entry in entries {
        let mode = entry
            .permissions
            .map(|p| format!("{:04o}", p & 0o7777))
            .unwrap_or_else(|| "----".to_string());
        let kind = if entry.is_dir { 'd' } else { '-' };
        let suffix = if entry.is_dir { "/" } else { "" };
        println!("{kind} {mode} {:>12} {}{suffix}", entry.size, entry.name);
    }
}

fn print_summary(verb: &str, summary: &TransferSummary) {
    println!(
        "{verb} {} file(s), {} bytes ({} director{} created).",
        summary.files,
        summary.bytes,
        summary.dirs,
        if summary.dirs == 1 { "y" } else { "ies" }
    );
}
