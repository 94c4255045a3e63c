use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
use russh_sftp::client::fs::File as SftpFile;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::{Result, SshError};
use crate::ssh::Session;

const COPY_BUFFER: usize = 32 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub permissions: Option<u32>,
}

/// Remote filesystem operations used by the transfer engine. Paths are
/// `/`-separated strings as the server sees them.
#[async_trait]
pub trait RemoteFs: Send + Sync {
    type Reader: AsyncRead + Unpin + Send;
    type Writer: AsyncWrite + Unpin + Send;

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>>;
    async fn stat(&self, path: &str) -> Result<RemoteEntry>;
    async fn create_dir(&self, path: &str) -> Result<()>;
    async fn open_read(&self, path: &str) -> Result<Self::Reader>;
    /// Creates or truncates.
    async fn create_file(&self, path: &str) -> Result<Self::Writer>;
    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()>;
    async fn remove_file(&self, path: &str) -> Result<()>;
    async fn remove_dir(&self, path: &str) -> Result<()>;
    async fn close(&self) -> Result<()>;
}

pub struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

fn entry_from(name: String, attrs: &FileAttributes) -> RemoteEntry {
    RemoteEntry {
        name,
        is_dir: attrs.is_dir(),
        size: attrs.size.unwrap_or(0),
        permissions: attrs.permissions,
    }
}

#[async_trait]
impl RemoteFs for SftpFs {
    type Reader = Pin<Box<SftpFile>>;
    type Writer = Pin<Box<SftpFile>>;

    async fn read_dir(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))?;
        Ok(entries
            .map(|entry| entry_from(entry.file_name(), &entry.metadata()))
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<RemoteEntry> {
        let attrs = self
            .sftp
            .metadata(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))?;
        Ok(entry_from(base_name(path).to_string(), &attrs))
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))
    }

    async fn open_read(&self, path: &str) -> Result<Self::Reader> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))?;
        Ok(Box::pin(file))
    }

    async fn create_file(&self, path: &str) -> Result<Self::Writer> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))?;
        Ok(Box::pin(file))
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> Result<()> {
        let mut attrs = FileAttributes::empty();
        attrs.permissions = Some(mode);
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|err| SshError::remote_io(path, err))
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        self.sftp
            .remove_file(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))
    }

    async fn remove_dir(&self, path: &str) -> Result<()> {
        self.sftp
            .remove_dir(path)
            .await
            .map_err(|err| SshError::remote_io(path, err))
    }

    async fn close(&self) -> Result<()> {
        self.sftp
            .close()
            .await
            .map_err(|err| SshError::Channel(format!("failed to close SFTP session: {err}")))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

impl TransferSummary {
    fn file(bytes: u64) -> Self {
        Self {
            files: 1,
            dirs: 0,
            bytes,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoteKind {
    File,
    Directory,
}

/// Decides what an untyped remote path is from its listing. A path that
/// cannot be listed, or that lists as exactly one non-directory entry, is a
/// file. A directory holding exactly one file is therefore misread as a
/// file; callers rely on this, so it is kept.
pub fn classify_listing(listing: Option<&[RemoteEntry]>) -> RemoteKind {
    match listing {
        None => RemoteKind::File,
        Some([only]) if !only.is_dir => RemoteKind::File,
        Some(_) => RemoteKind::Directory,
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UploadStep {
    MakeDir { remote: String },
    Upload { local: PathBuf, remote: String },
}

/// Depth-first plan for mirroring `local_dir` under `remote_dir`. Entries
/// are visited in name order and every `MakeDir` precedes the steps for
/// its contents.
pub fn plan_upload(local_dir: &Path, remote_dir: &str) -> Result<Vec<UploadStep>> {
    let mut steps = vec![UploadStep::MakeDir {
        remote: remote_dir.to_string(),
    }];
    plan_dir(local_dir, remote_dir, &mut steps)?;
    Ok(steps)
}

fn plan_dir(local: &Path, remote: &str, steps: &mut Vec<UploadStep>) -> Result<()> {
    let mut entries = std::fs::read_dir(local)
        .and_then(|it| it.collect::<io::Result<Vec<_>>>())
        .map_err(|err| SshError::local_io(local, err))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let remote_path = join_remote(remote, &name);
        let file_type = entry
            .file_type()
            .map_err(|err| SshError::local_io(&path, err))?;
        if file_type.is_dir() {
            steps.push(UploadStep::MakeDir {
                remote: remote_path.clone(),
            });
            plan_dir(&path, &remote_path, steps)?;
        } else {
            steps.push(UploadStep::Upload {
                local: path,
                remote: remote_path,
            });
        }
    }
    Ok(())
}

pub fn join_remote(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => None,
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

/// Where a single local file lands for a caller-supplied remote path. A
/// relative remote path names a directory and gets the file name appended.
pub fn upload_target(local: &Path, remote: &str) -> String {
    if remote.starts_with('/') {
        return remote.to_string();
    }
    match local.file_name() {
        Some(name) => join_remote(remote, &name.to_string_lossy()),
        None => remote.to_string(),
    }
}

pub struct Transfer<F: RemoteFs = SftpFs> {
    fs: F,
}

impl Transfer<SftpFs> {
    /// Connects `session` if needed and starts the SFTP subsystem on a
    /// dedicated channel held until [`Transfer::close`].
    pub async fn open(session: &mut Session) -> Result<Self> {
        session.ensure_connected().await?;
        let channel = session.open_channel().await?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|err| SshError::Channel(format!("failed to request SFTP subsystem: {err}")))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|err| SshError::Channel(format!("failed to start SFTP: {err}")))?;
        debug!("SFTP session open on {}", session.profile().name);
        Ok(Self::new(SftpFs::new(sftp)))
    }
}

impl<F: RemoteFs> Transfer<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    pub async fn close(self) -> Result<()> {
        self.fs.close().await
    }

    pub async fn upload(&self, local: &Path, remote: &str) -> Result<u64> {
        if let Some(parent) = remote_parent(remote) {
            self.create_remote_dir_all(parent).await?;
        }
        self.put_file(local, remote).await
    }

    /// Copies `remote` to `local`, creating missing local parents. A failed
    /// copy removes the partial local file.
    pub async fn download(&self, remote: &str, local: &Path) -> Result<u64> {
        let mode = self.fs.stat(remote).await?.permissions;
        let mut source = self.fs.open_read(remote).await?;

        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SshError::local_io(parent, err))?;
        }
        let mut dest = tokio::fs::File::create(local)
            .await
            .map_err(|err| SshError::local_io(local, err))?;

        let copied = copy_stream(
            &mut source,
            &mut dest,
            |err| SshError::remote_io(remote, err),
            |err| SshError::local_io(local, err),
        )
        .await;
        drop(dest);
        let bytes = match copied {
            Ok(bytes) => bytes,
            Err(err) => {
                if let Err(rm) = tokio::fs::remove_file(local).await {
                    warn!("partial download left at {}: {rm}", local.display());
                }
                return Err(err);
            }
        };
        if let Some(mode) = mode {
            apply_local_mode(local, mode).await;
        }
        info!("downloaded {remote} -> {} ({bytes} bytes)", local.display());
        Ok(bytes)
    }

    pub async fn upload_dir(&self, local_dir: &Path, remote_dir: &str) -> Result<TransferSummary> {
        let (root, target) = (local_dir.to_path_buf(), remote_dir.to_string());
        let steps = tokio::task::spawn_blocking(move || plan_upload(&root, &target))
            .await
            .map_err(|err| SshError::local_io(local_dir, io::Error::other(err)))??;
        let mut summary = TransferSummary::default();
        for step in steps {
            match step {
                UploadStep::MakeDir { remote } => {
                    self.create_remote_dir_all(&remote).await?;
                    summary.dirs += 1;
                }
                UploadStep::Upload { local, remote } => {
                    summary.bytes += self.put_file(&local, &remote).await?;
                    summary.files += 1;
                }
            }
        }
        info!(
            "uploaded {} -> {remote_dir}: {} file(s), {} dir(s), {} bytes",
            local_dir.display(),
            summary.files,
            summary.dirs,
            summary.bytes
        );
        Ok(summary)
    }

    pub async fn download_dir(&self, remote_dir: &str, local_dir: &Path) -> Result<TransferSummary> {
        let mut summary = TransferSummary::default();
        let mut pending = vec![(remote_dir.to_string(), local_dir.to_path_buf(), None)];

        while let Some((remote, local, mode)) = pending.pop() {
            tokio::fs::create_dir_all(&local)
                .await
                .map_err(|err| SshError::local_io(&local, err))?;
            if let Some(mode) = mode {
                // Owner keeps full access so the walk can fill the directory.
                apply_local_mode(&local, mode | 0o700).await;
            }
            summary.dirs += 1;

            let mut subdirs = Vec::new();
            for entry in self.list_remote(&remote).await? {
                let remote_path = join_remote(&remote, &entry.name);
                let local_path = local.join(&entry.name);
                if entry.is_dir {
                    subdirs.push((remote_path, local_path, entry.permissions));
                } else {
                    summary.bytes += self.download(&remote_path, &local_path).await?;
                    summary.files += 1;
                }
            }
            pending.extend(subdirs.into_iter().rev());
        }
        info!(
            "downloaded {remote_dir} -> {}: {} file(s), {} dir(s), {} bytes",
            local_dir.display(),
            summary.files,
            summary.dirs,
            summary.bytes
        );
        Ok(summary)
    }

    /// Entries of `path` sorted by name, without `.` and `..`.
    pub async fn list_remote(&self, path: &str) -> Result<Vec<RemoteEntry>> {
        let mut entries: Vec<RemoteEntry> = self
            .fs
            .read_dir(path)
            .await?
            .into_iter()
            .filter(|e| e.name != "." && e.name != "..")
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    pub async fn remove_remote(&self, path: &str) -> Result<()> {
        if self.fs.stat(path).await?.is_dir {
            self.fs.remove_dir(path).await?;
        } else {
            self.fs.remove_file(path).await?;
        }
        info!("removed {path}");
        Ok(())
    }

    /// Downloads `remote` as a file or as a directory tree, decided by
    /// [`classify_listing`].
    pub async fn download_auto(&self, remote: &str, local: &Path) -> Result<TransferSummary> {
        let listing = match self.list_remote(remote).await {
            Ok(entries) => Some(entries),
            Err(err) => {
                debug!("{remote} is not listable ({err}); treating it as a file");
                None
            }
        };
        match classify_listing(listing.as_deref()) {
            RemoteKind::File => Ok(TransferSummary::file(self.download(remote, local).await?)),
            RemoteKind::Directory => self.download_dir(remote, local).await,
        }
    }

    pub async fn upload_auto(&self, local: &Path, remote: &str) -> Result<TransferSummary> {
        let meta = tokio::fs::metadata(local)
            .await
            .map_err(|err| SshError::local_io(local, err))?;
        if meta.is_dir() {
            return self.upload_dir(local, remote).await;
        }
        let target = upload_target(local, remote);
        Ok(TransferSummary::file(self.upload(local, &target).await?))
    }

    /// Uploads without creating parents; the caller guarantees they exist.
    async fn put_file(&self, local: &Path, remote: &str) -> Result<u64> {
        let mut source = tokio::fs::File::open(local)
            .await
            .map_err(|err| SshError::local_io(local, err))?;
        let meta = source
            .metadata()
            .await
            .map_err(|err| SshError::local_io(local, err))?;
        let mut dest = self.fs.create_file(remote).await?;

        if let Err(err) = self.fs.set_permissions(remote, local_mode(&meta)).await {
            debug!("could not set permissions on {remote}: {err}");
        }

        let bytes = copy_stream(
            &mut source,
            &mut dest,
            |err| SshError::local_io(local, err),
            |err| SshError::remote_io(remote, err),
        )
        .await?;
        info!("uploaded {} -> {remote} ({bytes} bytes)", local.display());
        Ok(bytes)
    }

    async fn create_remote_dir_all(&self, path: &str) -> Result<()> {
        let mut current = if path.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        };
        for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
            current = join_remote(&current, part);
            match self.fs.stat(&current).await {
                Ok(entry) if entry.is_dir => {}
                Ok(_) => {
                    return Err(SshError::remote_io(
                        current,
                        "exists and is not a directory",
                    ))
                }
                Err(_) => self.fs.create_dir(&current).await?,
            }
        }
        Ok(())
    }
}

async fn copy_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    on_read: impl Fn(io::Error) -> SshError,
    on_write: impl Fn(io::Error) -> SshError,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.map_err(&on_read)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await.map_err(&on_write)?;
        total += n as u64;
    }
    writer.flush().await.map_err(&on_write)?;
    writer.shutdown().await.map_err(&on_write)?;
    Ok(total)
}

#[cfg(unix)]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn local_mode(meta: &std::fs::Metadata) -> u32 {
    if meta.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(unix)]
async fn apply_local_mode(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;
    let perms = std::fs::Permissions::from_mode(mode & 0o7777);
    if let Err(err) = tokio::fs::set_permissions(path, perms).await {
        debug!("could not set permissions on {}: {err}", path.display());
    }
}

#[cfg(not(unix))]
async fn apply_local_mode(_path: &Path, _mode: u32) {}
