//! File access for document sources: stdin spooling, HTTP download, and
//! content fingerprinting for the ingest cache.
//!
//! All staged files live in one temp directory owned by the run; the
//! directory (downloads, stdin spool) is deleted when the run closes.

use crate::error::SqError;
use crate::source::{Source, STDIN_HANDLE};
use crc::{Crc, CRC_64_ECMA_182};
use eyre::{Result, WrapErr};
use parking_lot::Mutex;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::debug;

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// How much of a file's head feeds the content fingerprint.
const FINGERPRINT_HEAD: usize = 64 * 1024;

pub struct Files {
    stage_dir: TempDir,
    stdin_spool: Mutex<Option<PathBuf>>,
}

impl Files {
    pub fn new() -> Result<Self> {
        let stage_dir = tempfile::Builder::new()
            .prefix("sq-files-")
            .tempdir()
            .map_err(|e| SqError::io(format!("create staging dir: {e}")))?;
        Ok(Files {
            stage_dir,
            stdin_spool: Mutex::new(None),
        })
    }

    /// Spools piped stdin to a staging file so it can be sampled and then
    /// re-read during ingest.
    pub fn add_stdin(&self, mut reader: impl Read) -> Result<PathBuf> {
        let path = self.stage_dir.path().join("stdin");
        let mut out = BufWriter::new(
            File::create(&path).map_err(|e| SqError::io(format!("spool stdin: {e}")))?,
        );
        std::io::copy(&mut reader, &mut out)
            .and_then(|_| out.flush())
            .map_err(|e| SqError::io(format!("spool stdin: {e}")))?;

        *self.stdin_spool.lock() = Some(path.clone());
        debug!(path = %path.display(), "spooled stdin");
        Ok(path)
    }

    /// Resolves a document source's location to a local file path:
    /// `@stdin` uses the spool, `http(s)://` downloads into the staging
    /// dir (cached per URL), anything else is a filesystem path.
    pub fn local_path(&self, src: &Source) -> Result<PathBuf> {
        if src.handle == STDIN_HANDLE {
            return self
                .stdin_spool
                .lock()
                .clone()
                .ok_or_else(|| SqError::not_exist("no data on stdin").into());
        }

        let loc = &src.location;
        if loc.starts_with("http://") || loc.starts_with("https://") {
            return self.download(loc);
        }

        let path = PathBuf::from(loc);
        if !path.exists() {
            return Err(SqError::not_exist(format!("file not found: {loc}")).into());
        }
        Ok(path)
    }

    fn download(&self, url: &str) -> Result<PathBuf> {
        let key = format!("dl-{:016x}", CRC64.checksum(url.as_bytes()));
        let path = self.stage_dir.path().join(key);
        if path.exists() {
            return Ok(path);
        }

        debug!(url, "download document source");
        let resp = ureq::get(url)
            .call()
            .map_err(|e| SqError::io(format!("download {url}: {e}")))?;

        let mut out = BufWriter::new(
            File::create(&path).map_err(|e| SqError::io(format!("stage download: {e}")))?,
        );
        std::io::copy(&mut resp.into_reader(), &mut out)
            .and_then(|_| out.flush())
            .map_err(|e| SqError::io(format!("download {url}: {e}")))?;
        Ok(path)
    }

    /// Content fingerprint for the ingest cache: file size, mtime, and a
    /// CRC of the head. Any file change invalidates it.
    pub fn fingerprint(path: &Path) -> Result<u64> {
        let meta = std::fs::metadata(path)
            .map_err(|e| SqError::io(format!("stat {}: {e}", path.display())))?;

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as u64);

        let mut head = vec![0u8; FINGERPRINT_HEAD];
        let mut f = File::open(path)
            .map_err(|e| SqError::io(format!("open {}: {e}", path.display())))?;
        let mut filled = 0;
        while filled < head.len() {
            let n = f
                .read(&mut head[filled..])
                .map_err(|e| SqError::io(format!("read {}: {e}", path.display())))
                .wrap_err("fingerprint")?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        let mut digest = CRC64.digest();
        digest.update(&meta.len().to_le_bytes());
        digest.update(&mtime.to_le_bytes());
        digest.update(&head[..filled]);
        Ok(digest.finalize())
    }
}
