use std::io;

use async_trait::async_trait;
use russh::{client, Channel, ChannelMsg, Pty};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::console::{self, ConsolePlatform};
use crate::error::{Result, SshError};
use crate::launcher::{current_executable, Environment, Launcher, SpawnTarget, Spawner};
use crate::ssh::Session;

/// SSH_EXTENDED_DATA_STDERR
const EXTENDED_DATA_STDERR: u32 = 1;
const PTY_TERM: &str = "xterm";
const PTY_MODES: [(Pty, u32); 3] = [
    (Pty::ECHO, 0),
    (Pty::TTY_OP_ISPEED, 14400),
    (Pty::TTY_OP_OSPEED, 14400),
];
const INPUT_CHUNK: usize = 1024;
const STREAM_QUEUE: usize = 32;

#[async_trait]
pub trait MessageSource: Send {
    async fn next_message(&mut self) -> Option<ChannelMsg>;
}

#[async_trait]
impl MessageSource for Channel<client::Msg> {
    async fn next_message(&mut self) -> Option<ChannelMsg> {
        self.wait().await
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitOutcome {
    Status(u32),
    Signal(String),
    Missing,
}

impl ExitOutcome {
    fn record(&mut self, msg: &ChannelMsg) {
        match msg {
            ChannelMsg::ExitStatus { exit_status } => *self = Self::Status(*exit_status),
            ChannelMsg::ExitSignal { signal_name, .. } => {
                *self = Self::Signal(format!("{signal_name:?}"))
            }
            _ => {}
        }
    }

    fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    /// Zero exit yields `output`; a non-zero exit keeps it inside the error.
    pub fn into_result(self, output: String) -> Result<String> {
        match self {
            Self::Status(0) => Ok(output),
            Self::Status(code) => Err(SshError::RemoteExit { code, output }),
            Self::Signal(signal) => Err(SshError::RemoteSignal(signal)),
            Self::Missing => Err(SshError::Channel(
                "channel closed without an exit status".to_string(),
            )),
        }
    }
}

pub struct Executor<'a> {
    session: &'a mut Session,
    console: &'static dyn ConsolePlatform,
}

impl<'a> Executor<'a> {
    pub fn new(session: &'a mut Session) -> Self {
        Self::with_console(session, console::current())
    }

    pub fn with_console(session: &'a mut Session, console: &'static dyn ConsolePlatform) -> Self {
        Self { session, console }
    }

    async fn start(&mut self, command: &str) -> Result<Channel<client::Msg>> {
        self.session.ensure_connected().await?;
        let channel = self.session.open_channel().await?;
        channel
            .exec(false, command)
            .await
            .map_err(|err| SshError::Channel(format!("failed to start command: {err}")))?;
        debug!("started remote command on {}", self.session.profile().name);
        Ok(channel)
    }

    /// Runs `command` and returns stdout and stderr combined. On a non-zero
    /// exit the captured output travels in [`SshError::RemoteExit`].
    pub async fn execute(&mut self, command: &str) -> Result<String> {
        let mut channel = self.start(command).await?;
        let mut output = Vec::new();
        let exit = copy_channel_output(&mut channel, &mut output).await?;
        exit.into_result(String::from_utf8_lossy(&output).into_owned())
    }

    /// Like [`Self::execute`] but writes the raw bytes into `sink` as they
    /// arrive. Whatever was written stays there when the command fails.
    pub async fn copy_output<W>(&mut self, command: &str, sink: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let mut channel = self.start(command).await?;
        let exit = copy_channel_output(&mut channel, sink).await?;
        exit.into_result(String::new()).map(drop)
    }

    pub async fn execute_with_stream(&mut self, command: &str) -> Result<()> {
        self.execute_with_stream_to(command, tokio::io::stdout(), tokio::io::stderr())
            .await
    }

    pub async fn execute_with_stream_to<O, E>(
        &mut self,
        command: &str,
        stdout: O,
        stderr: E,
    ) -> Result<()>
    where
        O: AsyncWrite + Unpin + Send + 'static,
        E: AsyncWrite + Unpin + Send + 'static,
    {
        let mut channel = self.start(command).await?;
        stream_output(&mut channel, stdout, stderr).await
    }

    /// Interactive shell. With `open_in_new_surface` the binary is re-run as
    /// `connect <name> --no-new-tab` in a new tab, then a new window; if both
    /// fail the shell runs here.
    pub async fn execute_shell(&mut self, open_in_new_surface: bool) -> Result<()> {
        self.execute_shell_with(open_in_new_surface, &Launcher::system())
            .await
    }

    pub async fn execute_shell_with<E: Environment, S: Spawner>(
        &mut self,
        open_in_new_surface: bool,
        launcher: &Launcher<E, S>,
    ) -> Result<()> {
        if open_in_new_surface {
            match self.open_surface(launcher) {
                Ok(()) => return Ok(()),
                Err(err) => warn!("{err}; running the shell in the current terminal"),
            }
        }
        self.run_shell().await
    }

    fn open_surface<E: Environment, S: Spawner>(&self, launcher: &Launcher<E, S>) -> Result<()> {
        let name = &self.session.profile().name;
        let target = SpawnTarget::reconnect(current_executable()?, name);
        launcher.open_in_new_tab(&target).or_else(|err| {
            debug!("new tab failed ({err}); trying a new window");
            launcher.open_in_new_window(&target)
        })?;
        info!("opened a new terminal surface for {name}");
        Ok(())
    }

    async fn run_shell(&mut self) -> Result<()> {
        self.session.ensure_connected().await?;
        let mut channel = self.session.open_channel().await?;

        let size = console::pty_size(self.console);
        channel
            .request_pty(
                false,
                PTY_TERM,
                size.cols.into(),
                size.rows.into(),
                0,
                0,
                &PTY_MODES,
            )
            .await
            .map_err(|err| SshError::Channel(format!("failed to request PTY: {err}")))?;
        channel
            .request_shell(true)
            .await
            .map_err(|err| SshError::Channel(format!("failed to start shell: {err}")))?;
        info!(
            "shell started on {} ({}x{})",
            self.session.profile().name,
            size.cols,
            size.rows
        );

        let input = spawn_input_forwarder(self.console)?;
        let writer = channel.make_writer();
        let exit = pump_shell(
            &mut channel,
            writer,
            input,
            tokio::io::stdout(),
            tokio::io::stderr(),
        )
        .await?;
        debug!("shell finished: {exit:?}");
        exit.into_result(String::new()).map(drop)
    }
}

/// Reads local stdin on a plain thread; a blocking console read cannot be
/// cancelled, so the thread is left to die with the process.
fn spawn_input_forwarder(
    console: &'static dyn ConsolePlatform,
) -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin-forwarder".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut reader = stdin.lock();
            let mut buf = [0u8; INPUT_CHUNK];
            loop {
                match console.read_filtered_input(&mut reader, &mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        debug!("stdin read failed: {err}");
                        break;
                    }
                }
            }
        })
        .map_err(|err| SshError::local_io("stdin", err))?;
    Ok(rx)
}

async fn copy_channel_output<M, W>(source: &mut M, sink: &mut W) -> Result<ExitOutcome>
where
    M: MessageSource + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut exit = ExitOutcome::Missing;
    while let Some(msg) = source.next_message().await {
        match msg {
            ChannelMsg::Data { data } | ChannelMsg::ExtendedData { data, .. } => sink
                .write_all(data.as_ref())
                .await
                .map_err(|err| SshError::local_io("output sink", err))?,
            ChannelMsg::Close => break,
            other => exit.record(&other),
        }
    }
    sink.flush()
        .await
        .map_err(|err| SshError::local_io("output sink", err))?;
    Ok(exit)
}

/// At remote EOF both drains are awaited before the exit status is read.
async fn stream_output<M, O, E>(source: &mut M, stdout: O, stderr: E) -> Result<()>
where
    M: MessageSource + ?Sized,
    O: AsyncWrite + Unpin + Send + 'static,
    E: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::channel(STREAM_QUEUE);
    let (err_tx, err_rx) = mpsc::channel(STREAM_QUEUE);
    let out_drain = tokio::spawn(drain_lines(out_rx, stdout));
    let err_drain = tokio::spawn(drain_lines(err_rx, stderr));

    // A full queue pauses channel reads. A failed send means that drain died.
    let mut exit = ExitOutcome::Missing;
    let mut closed = false;
    loop {
        match source.next_message().await {
            Some(ChannelMsg::Data { data }) => {
                if out_tx.send(data.as_ref().to_vec()).await.is_err() {
                    break;
                }
            }
            Some(ChannelMsg::ExtendedData { data, ext }) if ext == EXTENDED_DATA_STDERR => {
                if err_tx.send(data.as_ref().to_vec()).await.is_err() {
                    break;
                }
            }
            Some(ChannelMsg::Eof) => break,
            Some(ChannelMsg::Close) | None => {
                closed = true;
                break;
            }
            Some(other) => exit.record(&other),
        }
    }

    drop(out_tx);
    drop(err_tx);
    let (out_done, err_done) = tokio::join!(out_drain, err_drain);
    finish_drain(out_done, "stdout")?;
    finish_drain(err_done, "stderr")?;

    if !closed {
        while exit.is_missing() {
            match source.next_message().await {
                Some(ChannelMsg::Close) | None => break,
                Some(other) => exit.record(&other),
            }
        }
    }
    exit.into_result(String::new()).map(drop)
}

fn finish_drain(
    done: std::result::Result<io::Result<()>, tokio::task::JoinError>,
    stream: &str,
) -> Result<()> {
    match done {
        Ok(result) => result.map_err(|err| SshError::local_io(stream, err)),
        Err(join) => Err(SshError::local_io(stream, io::Error::other(join))),
    }
}

/// Writes each complete line with its trailing `\r` removed. A final line
/// without a newline still gets one.
async fn drain_lines<W>(mut chunks: mpsc::Receiver<Vec<u8>>, mut sink: W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut pending = Vec::new();
    while let Some(chunk) = chunks.recv().await {
        pending.extend_from_slice(&chunk);
        while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = pending.drain(..=pos).collect();
            line.pop();
            write_line(&mut sink, line).await?;
        }
        sink.flush().await?;
    }
    if !pending.is_empty() {
        write_line(&mut sink, pending).await?;
    }
    sink.flush().await
}

async fn write_line<W: AsyncWrite + Unpin>(sink: &mut W, mut line: Vec<u8>) -> io::Result<()> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line.push(b'\n');
    sink.write_all(&line).await
}

/// Shuttles keystrokes to the remote PTY and its output to the local
/// terminal until the channel closes. Local EOF becomes remote EOF.
async fn pump_shell<M, W, O, E>(
    source: &mut M,
    mut remote_in: W,
    mut input: mpsc::UnboundedReceiver<Vec<u8>>,
    mut stdout: O,
    mut stderr: E,
) -> Result<ExitOutcome>
where
    M: MessageSource + ?Sized,
    W: AsyncWrite + Unpin,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let channel_err = |err: io::Error| SshError::Channel(format!("channel write failed: {err}"));
    let mut input_open = true;
    let mut exit = ExitOutcome::Missing;
    loop {
        tokio::select! {
            biased;
            chunk = input.recv(), if input_open => match chunk {
                Some(bytes) => {
                    remote_in.write_all(&bytes).await.map_err(channel_err)?;
                    remote_in.flush().await.map_err(channel_err)?;
                }
                None => {
                    input_open = false;
                    debug!("local input closed; sending EOF");
                    let _ = remote_in.shutdown().await;
                }
            },
            msg = source.next_message() => match msg {
                Some(ChannelMsg::Data { data }) => {
                    stdout.write_all(data.as_ref()).await.map_err(|err| SshError::local_io("stdout", err))?;
                    stdout.flush().await.map_err(|err| SshError::local_io("stdout", err))?;
                }
                Some(ChannelMsg::ExtendedData { data, .. }) => {
                    stderr.write_all(data.as_ref()).await.map_err(|err| SshError::local_io("stderr", err))?;
                    stderr.flush().await.map_err(|err| SshError::local_io("stderr", err))?;
                }
                Some(ChannelMsg::Close) | None => break,
                Some(other) => exit.record(&other),
            },
        }
    }
    Ok(exit)
}
