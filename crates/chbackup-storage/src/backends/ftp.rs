//! FTP backend over a single suppaftp control session.
//!
//! suppaftp is blocking, so every command runs on the blocking pool while
//! holding the session lock. Downloads keep the lock for the whole `RETR`
//! and hand bytes over through a bounded pipe.

use crate::error::{Result, StorageError};
use crate::file::RemoteFile;
use crate::path::{join_path, relative_name};
use crate::traits::{RemoteReader, RemoteStorage, WalkVisitor};
use async_trait::async_trait;
use chbackup_archive::pipe;
use chbackup_core::time::parse_duration;
use chbackup_core::{ConfigError, FtpConfig};
use chrono::{DateTime, Utc};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use suppaftp::list::File as ListEntry;
use suppaftp::types::FileType;
use suppaftp::{FtpError, NativeTlsConnector, NativeTlsFtpStream, Status};
use tokio::sync::oneshot;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const KIND: &str = "FTP";

type Session = Arc<Mutex<Option<NativeTlsFtpStream>>>;

/// FTP backend
pub struct FtpBackend {
    config: FtpConfig,
    session: Session,
    cancel: CancellationToken,
}

impl FtpBackend {
    pub fn new(config: FtpConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            session: Arc::new(Mutex::new(None)),
            cancel,
        }
    }

    /// Absolute remote path of `key`
    fn remote_path(&self, key: &str) -> String {
        let joined = join_path(&[&self.config.path, key]);
        if joined.starts_with('/') {
            joined
        } else {
            format!("/{}", joined)
        }
    }

    /// Runs `op` against the connected session on the blocking pool.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut NativeTlsFtpStream) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&session)?;
            let ftp = guard.as_mut().ok_or(StorageError::NotConnected)?;
            op(ftp)
        })
        .await
        .map_err(|e| StorageError::Io(io::Error::other(e)))?
    }

    fn open_session(config: &FtpConfig) -> Result<NativeTlsFtpStream> {
        let timeout = parse_duration(&config.timeout).map_err(|e| {
            StorageError::Config(ConfigError::InvalidTimeout {
                field: "ftp.timeout".to_string(),
                value: config.timeout.clone(),
                message: e.to_string(),
            })
        })?;
        let addr = resolve(&config.address)?;

        let connected = if timeout.is_zero() {
            NativeTlsFtpStream::connect(addr)
        } else {
            NativeTlsFtpStream::connect_timeout(addr, timeout)
        };
        let mut ftp = connected.map_err(|e| StorageError::connection(KIND, e))?;
        if config.tls {
            let connector = native_tls::TlsConnector::new()
                .map_err(|e| StorageError::connection(KIND, e))?;
            let host = host_name(&config.address);
            ftp = ftp
                .into_secure(NativeTlsConnector::from(connector), host)
                .map_err(|e| StorageError::connection(KIND, e))?;
        }
        ftp.login(&config.username, &config.password)
            .map_err(|e| StorageError::connection(KIND, e))?;
        ftp.transfer_type(FileType::Binary)
            .map_err(|e| StorageError::connection(KIND, e))?;
        ftp.pwd().map_err(|e| StorageError::connection(KIND, e))?;
        Ok(ftp)
    }
}

impl std::fmt::Debug for FtpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpBackend")
            .field("address", &self.config.address)
            .field("username", &self.config.username)
            .field("path", &self.config.path)
            .field("tls", &self.config.tls)
            .finish_non_exhaustive()
    }
}

impl Drop for FtpBackend {
    fn drop(&mut self) {
        // A transfer may still own the session
        let Some(mut ftp) = self.session.try_lock().ok().and_then(|mut guard| guard.take()) else {
            return;
        };
        // QUIT blocks on the server reply, keep it off runtime workers
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || quit(&mut ftp));
            }
            Err(_) => quit(&mut ftp),
        }
    }
}

fn quit(ftp: &mut NativeTlsFtpStream) {
    if let Err(e) = ftp.quit() {
        debug!("FTP QUIT failed: {}", e);
    }
}

fn lock(session: &Session) -> Result<std::sync::MutexGuard<'_, Option<NativeTlsFtpStream>>> {
    session
        .lock()
        .map_err(|_| StorageError::provider(KIND, "FTP session lock poisoned"))
}

fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| StorageError::connection(KIND, e))?
        .next()
        .ok_or_else(|| StorageError::connection(KIND, format!("cannot resolve {}", address)))
}

/// Host part of `host:port`, used for TLS server name checks
fn host_name(address: &str) -> &str {
    address
        .rsplit_once(':')
        .map_or(address, |(host, _)| host)
        .trim_start_matches('[')
        .trim_end_matches(']')
}

fn is_unavailable(err: &FtpError) -> bool {
    matches!(err, FtpError::UnexpectedResponse(resp) if resp.status == Status::FileUnavailable)
}

/// Maps a command failure on `path`, 550 to not-found.
fn map_error(path: &str, err: FtpError) -> StorageError {
    if is_unavailable(&err) {
        StorageError::not_found(path)
    } else {
        StorageError::provider(KIND, err)
    }
}

/// Lists `dir`, calling `visit` with names relative to `root`.
fn walk_dir(
    ftp: &mut NativeTlsFtpStream,
    root: &str,
    dir: &str,
    recursive: bool,
    visit: &mut dyn FnMut(RemoteFile) -> Result<()>,
) -> Result<()> {
    let lines = match ftp.list(Some(dir)) {
        Ok(lines) => lines,
        Err(e) if is_unavailable(&e) => return Ok(()),
        Err(e) => return Err(StorageError::provider(KIND, e)),
    };

    let mut subdirs = Vec::new();
    for line in lines {
        let entry = match ListEntry::try_from(line.as_str()) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping unparsable LIST line {:?}: {:?}", line, e);
                continue;
            }
        };
        let name = entry.name();
        if name == "." || name == ".." {
            continue;
        }
        let full = join_path(&[dir, name]);
        let relative = relative_name(&full, root).to_string();

        if entry.is_directory() {
            if recursive {
                subdirs.push(full);
            } else {
                visit(RemoteFile::dir(relative))?;
            }
        } else {
            let modified = DateTime::<Utc>::from(entry.modified());
            visit(RemoteFile::file(
                relative,
                entry.size() as u64,
                Some(modified),
            ))?;
        }
    }

    for sub in subdirs {
        walk_dir(ftp, root, &sub, recursive, visit)?;
    }
    Ok(())
}

/// Creates every missing parent directory of `path`.
fn make_parents(ftp: &mut NativeTlsFtpStream, path: &str) -> Result<()> {
    let Some((parent, _)) = path.rsplit_once('/') else {
        return Ok(());
    };
    let mut current = String::new();
    for segment in parent.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        match ftp.mkdir(&current) {
            Ok(()) => debug!("Created FTP directory {}", current),
            // Already exists
            Err(e) if is_unavailable(&e) => {}
            Err(e) => return Err(StorageError::provider(KIND, e)),
        }
    }
    Ok(())
}

#[async_trait]
impl RemoteStorage for FtpBackend {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn connect(&mut self) -> Result<()> {
        if lock(&self.session)?.is_some() {
            debug!("FTP backend already connected");
            return Ok(());
        }

        let config = self.config.clone();
        let ftp = tokio::task::spawn_blocking(move || Self::open_session(&config))
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))??;

        *lock(&self.session)? = Some(ftp);
        info!("Connected to FTP server {}", self.config.address);
        Ok(())
    }

    async fn stat_file(&self, key: &str) -> Result<RemoteFile> {
        let path = self.remote_path(key);
        let name = key.to_string();
        self.run(move |ftp| {
            let size = ftp.size(&path).map_err(|e| map_error(&path, e))?;
            let modified = match ftp.mdtm(&path) {
                Ok(ts) => Some(ts.and_utc()),
                Err(e) => {
                    debug!("MDTM {} failed: {}", path, e);
                    None
                }
            };
            Ok(RemoteFile::file(name, size as u64, modified))
        })
        .await
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let path = self.remote_path(key);
        self.run(move |ftp| ftp.rm(&path).map_err(|e| map_error(&path, e)))
            .await
    }

    async fn walk(
        &self,
        prefix: &str,
        recursive: bool,
        visit: &mut WalkVisitor<'_>,
    ) -> Result<()> {
        let dir = self.remote_path(prefix);
        let root = format!("{}/", dir.trim_end_matches('/'));

        // The visitor is borrowed, so collect on the blocking pool first
        let entries = self
            .run(move |ftp| {
                let mut entries = Vec::new();
                walk_dir(ftp, &root, &dir, recursive, &mut |file| {
                    entries.push(file);
                    Ok(())
                })?;
                Ok(entries)
            })
            .await?;

        for entry in entries {
            visit(entry)?;
        }
        Ok(())
    }

    async fn get_file_reader(&self, key: &str) -> Result<RemoteReader> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let path = self.remote_path(key);
        let session = Arc::clone(&self.session);
        let (mut writer, reader) = pipe::bounded(pipe::DEFAULT_CAPACITY);
        let (opened_tx, opened_rx) = oneshot::channel::<Result<()>>();

        tokio::task::spawn_blocking(move || {
            let mut guard = match lock(&session) {
                Ok(guard) => guard,
                Err(e) => {
                    let _ = opened_tx.send(Err(e));
                    return;
                }
            };
            let Some(ftp) = guard.as_mut() else {
                let _ = opened_tx.send(Err(StorageError::NotConnected));
                return;
            };

            let mut stream = match ftp.retr_as_stream(&path) {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = opened_tx.send(Err(map_error(&path, e)));
                    return;
                }
            };
            let _ = opened_tx.send(Ok(()));

            let copied = io::copy(&mut stream, &mut writer);
            let finalized = ftp.finalize_retr_stream(stream);
            match (copied, finalized) {
                (Ok(size), Ok(())) => {
                    debug!("Downloaded {} bytes from FTP {}", size, path);
                    if let Err(e) = writer.finish() {
                        debug!("FTP reader for {} dropped: {}", path, e);
                    }
                }
                (Err(e), _) => writer.fail(e),
                (Ok(_), Err(e)) => writer.fail(io::Error::other(e)),
            }
        });

        opened_rx
            .await
            .map_err(|e| StorageError::Io(io::Error::other(e)))??;
        Ok(Box::pin(reader))
    }

    async fn put_file(&self, key: &str, reader: RemoteReader) -> Result<()> {
        let path = self.remote_path(key);
        let mut bridge = SyncIoBridge::new(reader);
        let size = self
            .run(move |ftp| {
                make_parents(ftp, &path)?;
                ftp.put_file(&path, &mut bridge)
                    .map_err(|e| StorageError::provider(KIND, e))
            })
            .await?;
        if size == 0 {
            warn!("Uploaded an empty file to FTP {}", key);
        } else {
            debug!("Uploaded {} bytes to FTP {}", size, key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(path: &str) -> FtpBackend {
        let config = FtpConfig {
            address: "ftp.example.com:21".to_string(),
            path: path.to_string(),
            ..Default::default()
        };
        FtpBackend::new(config, CancellationToken::new())
    }

    #[test]
    fn test_remote_path_is_absolute() {
        assert_eq!(backend("").remote_path("daily.tar"), "/daily.tar");
        assert_eq!(
            backend("backups").remote_path("daily/part_1.tar"),
            "/backups/daily/part_1.tar"
        );
        assert_eq!(backend("/srv/").remote_path("a"), "/srv/a");
    }

    #[test]
    fn test_host_name() {
        assert_eq!(host_name("ftp.example.com:21"), "ftp.example.com");
        assert_eq!(host_name("[::1]:21"), "::1");
        assert_eq!(host_name("ftp.example.com"), "ftp.example.com");
    }

    #[tokio::test]
    async fn test_operations_require_connect() {
        let backend = backend("backups");
        let err = backend.stat_file("daily.tar").await.unwrap_err();
        assert!(matches!(err, StorageError::NotConnected));

        let err = backend.get_file_reader("daily.tar").await.err().unwrap();
        assert!(matches!(err, StorageError::NotConnected));
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_config_error() {
        let config = FtpConfig {
            address: "127.0.0.1:21".to_string(),
            timeout: "later".to_string(),
            ..Default::default()
        };
        let mut backend = FtpBackend::new(config, CancellationToken::new());
        let err = backend.connect().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Config(ConfigError::InvalidTimeout { .. })
        ));
    }
}
