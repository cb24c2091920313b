//! Upload finished files to the FTP drop and archive them locally.
//!
//! Transport-only: list → upload in name order → move into `Processed/`.
//! Nothing is moved unless every upload succeeded, so a failed run leaves
//! the files where the next run will pick them up again.

use std::fs;
use std::io::Read;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use suppaftp::types::FileType;
use suppaftp::FtpStream;
use thiserror::Error;
use tracing::{debug, info, warn};

use reportflow_config::FtpConfig;

/// Socket timeout for connect and every transfer.
pub const FTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Local folder uploaded files are moved into.
pub const PROCESSED_DIR: &str = "Processed";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("invalid ftp.glob {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
    #[error("cannot list {}: {source}", dir.display())]
    List {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("FTP connection to {address} failed: {message}")]
    Connect { address: String, message: String },
    #[error("FTP {operation} failed: {message}")]
    Remote { operation: String, message: String },
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot move {} into {PROCESSED_DIR}: {source}", path.display())]
    Move {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The remote end of a publish: one logged-in session in the target folder.
pub trait RemoteArchive {
    fn upload(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64, PublishError>;

    /// Close the session. Errors here do not undo finished uploads.
    fn close(&mut self) -> Result<(), PublishError>;
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PublishReport {
    pub uploaded: Vec<String>,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_dir: Option<PathBuf>,
}

/// Files in `dir` whose name matches `pattern`, case-insensitively, sorted
/// by name. Subdirectories (including `Processed/`) are ignored.
pub fn matching_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, PublishError> {
    let compiled = glob::Pattern::new(pattern).map_err(|e| PublishError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    let options = glob::MatchOptions {
        case_sensitive: false,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    };

    let entries = fs::read_dir(dir).map_err(|source| PublishError::List { dir: dir.to_path_buf(), source })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| PublishError::List { dir: dir.to_path_buf(), source })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if compiled.matches_with(name, options) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Upload `files` through `remote`, then move them into `<local_dir>/Processed`.
pub fn publish_files<A: RemoteArchive + ?Sized>(
    remote: &mut A,
    local_dir: &Path,
    files: &[PathBuf],
) -> Result<PublishReport, PublishError> {
    let mut report = PublishReport::default();
    for path in files {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
        let mut file = fs::File::open(path).map_err(|source| PublishError::Read { path: path.clone(), source })?;
        let bytes = remote.upload(&name, &mut file)?;
        debug!(file = %name, bytes, "uploaded");
        report.bytes += bytes;
        report.uploaded.push(name);
    }
    if let Err(e) = remote.close() {
        warn!(error = %e, "FTP session did not close cleanly");
    }

    let processed = local_dir.join(PROCESSED_DIR);
    fs::create_dir_all(&processed).map_err(|source| PublishError::Move { path: processed.clone(), source })?;
    for path in files {
        let Some(name) = path.file_name() else { continue };
        let target = processed.join(name);
        if target.exists() {
            fs::remove_file(&target).map_err(|source| PublishError::Move { path: target.clone(), source })?;
        }
        fs::rename(path, &target).map_err(|source| PublishError::Move { path: path.clone(), source })?;
    }
    report.processed_dir = Some(processed);
    Ok(report)
}

/// Publish everything in the configured local folder that matches `ftp.glob`.
///
/// With nothing to upload no connection is made.
pub fn publish(ftp: &FtpConfig, local_dir: &Path) -> Result<PublishReport, PublishError> {
    let files = matching_files(local_dir, &ftp.glob)?;
    if files.is_empty() {
        info!(dir = %local_dir.display(), glob = %ftp.glob, "nothing to publish");
        return Ok(PublishReport::default());
    }
    info!(host = %ftp.host, port = ftp.port, files = files.len(), "publishing");

    let mut remote = FtpArchive::connect(ftp)?;
    let report = publish_files(&mut remote, local_dir, &files)?;
    info!(uploaded = report.uploaded.len(), bytes = report.bytes, "publish finished");
    Ok(report)
}

/// A logged-in FTP session in binary mode, sitting in `ftp.remote_dir`.
pub struct FtpArchive {
    stream: FtpStream,
}

impl FtpArchive {
    pub fn connect(ftp: &FtpConfig) -> Result<Self, PublishError> {
        let address = format!("{}:{}", ftp.host, ftp.port);
        let connect_err = |message: String| PublishError::Connect { address: address.clone(), message };

        let socket: SocketAddr = address
            .to_socket_addrs()
            .map_err(|e| connect_err(e.to_string()))?
            .next()
            .ok_or_else(|| connect_err("host did not resolve".to_string()))?;

        let mut stream = FtpStream::connect_timeout(socket, FTP_TIMEOUT).map_err(|e| connect_err(e.to_string()))?;
        stream
            .get_ref()
            .set_read_timeout(Some(FTP_TIMEOUT))
            .and_then(|_| stream.get_ref().set_write_timeout(Some(FTP_TIMEOUT)))
            .map_err(|e| connect_err(e.to_string()))?;

        stream.login(&ftp.user, &ftp.pass).map_err(|e| remote_err("login", e))?;
        if !ftp.remote_dir.is_empty() {
            stream.cwd(&ftp.remote_dir).map_err(|e| remote_err("cwd", e))?;
        }
        stream.transfer_type(FileType::Binary).map_err(|e| remote_err("TYPE I", e))?;
        debug!(address = %address, remote_dir = %ftp.remote_dir, "FTP session ready");
        Ok(Self { stream })
    }
}

impl RemoteArchive for FtpArchive {
    fn upload(&mut self, name: &str, mut reader: &mut dyn Read) -> Result<u64, PublishError> {
        self.stream
            .put_file(name, &mut reader)
            .map_err(|e| remote_err(&format!("STOR {name}"), e))
    }

    fn close(&mut self) -> Result<(), PublishError> {
        self.stream.quit().map_err(|e| remote_err("QUIT", e))
    }
}

fn remote_err(operation: &str, err: suppaftp::FtpError) -> PublishError {
    PublishError::Remote { operation: operation.to_string(), message: err.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MemoryArchive {
        stored: Vec<(String, Vec<u8>)>,
        fail_on: Option<String>,
        closed: bool,
    }

    impl RemoteArchive for MemoryArchive {
        fn upload(&mut self, name: &str, reader: &mut dyn Read) -> Result<u64, PublishError> {
            if self.fail_on.as_deref() == Some(name) {
                return Err(PublishError::Remote {
                    operation: format!("STOR {name}"),
                    message: "552 quota exceeded".into(),
                });
            }
            let mut bytes = Vec::new();
            reader.read_to_end(&mut bytes).unwrap();
            let n = bytes.len() as u64;
            self.stored.push((name.to_string(), bytes));
            Ok(n)
        }

        fn close(&mut self) -> Result<(), PublishError> {
            self.closed = true;
            Ok(())
        }
    }

    fn drop_folder() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("B.DNL"), b"bbb").unwrap();
        fs::write(dir.path().join("a.dnl"), b"aa").unwrap();
        fs::write(dir.path().join("notes.txt"), b"skip").unwrap();
        fs::create_dir(dir.path().join("sub.DNL")).unwrap();
        dir
    }

    #[test]
    fn glob_is_case_insensitive_and_sorted() {
        let dir = drop_folder();
        let files = matching_files(dir.path(), "*.DNL").unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap()).collect();
        assert_eq!(names, vec!["B.DNL", "a.dnl"]);
    }

    #[test]
    fn bad_pattern_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(matching_files(dir.path(), "[*.DNL"), Err(PublishError::Pattern { .. })));
    }

    #[test]
    fn success_moves_everything_to_processed() {
        let dir = drop_folder();
        let files = matching_files(dir.path(), "*.dnl").unwrap();
        let mut remote = MemoryArchive::default();

        let report = publish_files(&mut remote, dir.path(), &files).unwrap();
        assert_eq!(report.uploaded, vec!["B.DNL", "a.dnl"]);
        assert_eq!(report.bytes, 5);
        assert!(remote.closed);
        assert_eq!(remote.stored[0].1, b"bbb");

        let processed = dir.path().join(PROCESSED_DIR);
        assert!(processed.join("B.DNL").is_file());
        assert!(processed.join("a.dnl").is_file());
        assert!(!dir.path().join("B.DNL").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn failed_upload_moves_nothing() {
        let dir = drop_folder();
        let files = matching_files(dir.path(), "*.dnl").unwrap();
        let mut remote = MemoryArchive { fail_on: Some("a.dnl".into()), ..Default::default() };

        let err = publish_files(&mut remote, dir.path(), &files).unwrap_err();
        assert!(err.to_string().contains("STOR a.dnl"));
        assert!(dir.path().join("B.DNL").exists());
        assert!(dir.path().join("a.dnl").exists());
        assert!(!dir.path().join(PROCESSED_DIR).exists());
    }

    #[test]
    fn previously_processed_file_is_replaced() {
        let dir = drop_folder();
        fs::create_dir(dir.path().join(PROCESSED_DIR)).unwrap();
        fs::write(dir.path().join(PROCESSED_DIR).join("a.dnl"), b"old").unwrap();
        let files = matching_files(dir.path(), "a.*").unwrap();

        publish_files(&mut MemoryArchive::default(), dir.path(), &files).unwrap();
        assert_eq!(fs::read(dir.path().join(PROCESSED_DIR).join("a.dnl")).unwrap(), b"aa");
    }

    #[test]
    fn nothing_to_publish_skips_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let ftp = FtpConfig { enabled: true, host: "127.0.0.1".into(), port: 1, ..Default::default() };
        let report = publish(&ftp, dir.path()).unwrap();
        assert!(report.uploaded.is_empty());
        assert!(report.processed_dir.is_none());
    }

    #[test]
    fn refused_connection_leaves_files() {
        let dir = drop_folder();
        let ftp = FtpConfig {
            enabled: true,
            host: "127.0.0.1".into(),
            port: 1,
            glob: "*.DNL".into(),
            ..Default::default()
        };
        let err = publish(&ftp, dir.path()).unwrap_err();
        assert!(matches!(err, PublishError::Connect { .. }));
        assert!(dir.path().join("a.dnl").exists());
        assert!(!dir.path().join(PROCESSED_DIR).exists());
    }
}
