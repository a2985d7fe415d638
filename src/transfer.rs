//! File transfer over chunk dialects
//!
//! The sender splits a file into `chunk_size` fragments and talks each one as
//! a [`ChunkDialect`] whose sign is the file name. The receiving nucleus caches
//! fragments as they are built; once a sign is complete the [`FileReceiver`]
//! reads them back in order into the destination directory.

use blake3::Hasher;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::nucleus::error::{TransferError, TransferResult};
use crate::nucleus::{Cellet, Nucleus};
use crate::talk::dialect::{ChunkDialect, ChunkDialectFactory, Dialect};
use crate::talk::{AnyDialect, Primitive};

/// Number of fragments needed for `len` bytes; never zero
///
/// Fails when the count does not fit the `u32` fragment index.
pub fn fragment_count(len: u64, chunk_size: usize) -> TransferResult<u32> {
    let chunk_size = chunk_size.max(1);
    let count = len.div_ceil(chunk_size as u64).max(1);
    u32::try_from(count).map_err(|_| TransferError::TooManyFragments {
        length: len,
        chunk_size,
    })
}

fn file_name(sign: &str) -> TransferResult<&str> {
    Path::new(sign)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| TransferError::InvalidSign(sign.to_string()))
}

/// Splits files into chunk dialects
#[derive(Debug, Clone, Copy)]
pub struct FileSender {
    chunk_size: usize,
}

impl FileSender {
    /// Sender producing fragments of at most `chunk_size` bytes
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Fragment size
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Stream the fragments of `path` in index order
    pub fn fragments(&self, path: &Path) -> TransferResult<Fragments> {
        let sign = path
            .to_str()
            .map(file_name)
            .transpose()?
            .ok_or_else(|| TransferError::InvalidSign(path.display().to_string()))?
            .to_string();

        let file = File::open(path)?;
        let total_length = file.metadata()?.len();
        Ok(Fragments {
            reader: BufReader::new(file),
            sign,
            total_length,
            chunk_size: self.chunk_size,
            next: 0,
            count: fragment_count(total_length, self.chunk_size)?,
        })
    }

    /// Send `path` from `cellet` to `peer`; returns the fragment count
    pub fn send_file(&self, nucleus: &Nucleus, cellet: &str, peer: &str, path: &Path) -> crate::nucleus::Result<u32> {
        let fragments = self.fragments(path)?;
        let count = fragments.count;
        let sign = fragments.sign.clone();

        for fragment in fragments {
            nucleus.talk_dialect(cellet, peer, fragment?)?;
        }

        tracing::info!(sign = %sign, peer, fragments = count, "file sent");
        Ok(count)
    }
}

/// Sequential fragments of one file
#[derive(Debug)]
pub struct Fragments {
    reader: BufReader<File>,
    sign: String,
    total_length: u64,
    chunk_size: usize,
    next: u32,
    count: u32,
}

impl Fragments {
    /// Transfer sign
    pub fn sign(&self) -> &str {
        &self.sign
    }

    /// Total fragment count
    pub fn fragment_count(&self) -> u32 {
        self.count
    }
}

impl Iterator for Fragments {
    type Item = TransferResult<ChunkDialect>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }

        let mut data = Vec::with_capacity(self.chunk_size);
        if let Err(err) = (&mut self.reader)
            .take(self.chunk_size as u64)
            .read_to_end(&mut data)
        {
            self.next = self.count;
            return Some(Err(err.into()));
        }

        let index = self.next;
        self.next += 1;
        Some(Ok(ChunkDialect::new(
            self.sign.clone(),
            self.total_length,
            index,
            self.count,
            data,
        )))
    }
}

/// Summary of a reassembled file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Transfer sign
    pub sign: String,
    /// Destination path
    pub path: PathBuf,
    /// Bytes written
    pub bytes: u64,
    /// Fragments read
    pub fragments: usize,
    /// BLAKE3 hex digest of the written bytes
    pub digest: String,
}

/// Outcome of one [`FileReceiver::receive`] call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Receipt {
    /// More fragments are expected
    Progress {
        /// Transfer sign
        sign: String,
        /// Bytes received, assuming in-order delivery
        processed: u64,
        /// Payload length
        total: u64,
    },
    /// The file was written
    Completed(TransferReport),
}

/// Transfer lifecycle callbacks
pub trait TransferObserver: Send + Sync {
    /// A fragment of `sign` arrived
    fn on_progress(&self, _sign: &str, _processed: u64, _total: u64) {}

    /// A file was reassembled
    fn on_completed(&self, _report: &TransferReport) {}

    /// Reassembly failed
    fn on_failed(&self, _sign: &str, _error: &TransferError) {}
}

/// Reassembles completed signs from a chunk cache into a directory
pub struct FileReceiver {
    dir: PathBuf,
    chunk_size: usize,
    factory: Arc<ChunkDialectFactory>,
    observer: Option<Arc<dyn TransferObserver>>,
    assembling: Mutex<HashSet<(String, String)>>,
}

impl FileReceiver {
    /// Receiver writing into `dir`, reading fragments from `factory`
    pub fn new(dir: impl Into<PathBuf>, chunk_size: usize, factory: Arc<ChunkDialectFactory>) -> Self {
        Self {
            dir: dir.into(),
            chunk_size: chunk_size.max(1),
            factory,
            observer: None,
            assembling: Mutex::new(HashSet::new()),
        }
    }

    /// Attach an observer
    pub fn with_observer(mut self, observer: Arc<dyn TransferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Destination directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Account for a fragment that is already in the cache
    ///
    /// Fragments built from inbound primitives are cached by the factory
    /// before they reach here.
    pub fn receive(&self, chunk: &ChunkDialect) -> TransferResult<Receipt> {
        let processed = chunk.progress(self.chunk_size);
        if let Some(observer) = &self.observer {
            observer.on_progress(chunk.sign(), processed, chunk.total_length());
        }

        let progress = Receipt::Progress {
            sign: chunk.sign().to_string(),
            processed,
            total: chunk.total_length(),
        };

        let Some(tag) = chunk.meta().owner_tag() else {
            return Ok(progress);
        };
        if !self.factory.check_completed(tag, chunk.sign()) {
            return Ok(progress);
        }

        let key = (tag.to_string(), chunk.sign().to_string());
        if !self.assembling.lock().insert(key.clone()) {
            return Ok(progress);
        }
        let result = self.assemble(tag, chunk.sign(), chunk.chunk_num());
        self.assembling.lock().remove(&key);

        match result {
            Ok(report) => {
                tracing::info!(
                    sign = %report.sign,
                    bytes = report.bytes,
                    digest = %report.digest,
                    "file reassembled"
                );
                if let Some(observer) = &self.observer {
                    observer.on_completed(&report);
                }
                Ok(Receipt::Completed(report))
            }
            Err(err) => {
                tracing::warn!(sign = %chunk.sign(), error = %err, "file reassembly failed");
                if let Some(observer) = &self.observer {
                    observer.on_failed(chunk.sign(), &err);
                }
                Err(err)
            }
        }
    }

    fn assemble(&self, tag: &str, sign: &str, expected: u32) -> TransferResult<TransferReport> {
        let name = file_name(sign)?;
        let count = self.factory.fragment_count(tag, sign);
        if count < expected as usize {
            return Err(TransferError::Incomplete {
                sign: sign.to_string(),
                received: count,
                expected: expected as usize,
            });
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{name}.part"));

        let written = self
            .write_fragments(tag, sign, count, &temp_path)
            .and_then(|written| {
                fs::rename(&temp_path, &path)?;
                Ok(written)
            });
        let (bytes, digest) = match written {
            Ok(written) => written,
            Err(err) => {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    if cleanup.kind() != ErrorKind::NotFound {
                        tracing::debug!(path = %temp_path.display(), error = %cleanup, "temp file left behind");
                    }
                }
                return Err(err);
            }
        };

        self.factory.clear(tag, sign);

        Ok(TransferReport {
            sign: sign.to_string(),
            path,
            bytes,
            fragments: count,
            digest,
        })
    }

    /// Copy `count` cached fragments into `temp_path`; returns bytes and digest
    fn write_fragments(&self, tag: &str, sign: &str, count: usize, temp_path: &Path) -> TransferResult<(u64, String)> {
        let mut writer = BufWriter::new(File::create(temp_path)?);
        let mut hasher = Hasher::new();
        let mut buf = Vec::new();
        let mut bytes = 0u64;

        for index in 0..count {
            let missing = || TransferError::MissingFragment {
                sign: sign.to_string(),
                index,
            };
            let len = self.factory.fragment_length(tag, sign, index).ok_or_else(missing)?;
            buf.resize(len, 0);
            let read = self.factory.read(tag, sign, index, &mut buf).ok_or_else(missing)?;

            writer.write_all(&buf[..read])?;
            hasher.update(&buf[..read]);
            bytes += read as u64;
        }

        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        Ok((bytes, hasher.finalize().to_hex().to_string()))
    }
}

/// Cellet that feeds inbound chunk dialects to a [`FileReceiver`]
pub struct TransferCellet {
    identifier: String,
    receiver: FileReceiver,
    reports: Mutex<Vec<TransferReport>>,
}

impl TransferCellet {
    /// Create a transfer cellet
    pub fn new(identifier: impl Into<String>, receiver: FileReceiver) -> Self {
        Self {
            identifier: identifier.into(),
            receiver,
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Completed transfers so far
    pub fn reports(&self) -> Vec<TransferReport> {
        self.reports.lock().clone()
    }
}

impl Cellet for TransferCellet {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn dialogue(&self, peer_tag: &str, primitive: Primitive) {
        let Some(chunk) = primitive.dialect().and_then(AnyDialect::as_chunk) else {
            tracing::debug!(peer = %peer_tag, "ignoring non-chunk primitive");
            return;
        };

        match self.receiver.receive(chunk) {
            Ok(Receipt::Completed(report)) => self.reports.lock().push(report),
            Ok(Receipt::Progress { .. }) => {}
            Err(err) => {
                tracing::warn!(peer = %peer_tag, sign = %chunk.sign(), error = %err, "transfer failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fragment_count() {
        assert_eq!(fragment_count(0, 6144).unwrap(), 1);
        assert_eq!(fragment_count(6144, 6144).unwrap(), 1);
        assert_eq!(fragment_count(6145, 6144).unwrap(), 2);
        assert_eq!(fragment_count(10_000, 6144).unwrap(), 2);
        assert_eq!(fragment_count(5, 0).unwrap(), 5);
        assert_eq!(fragment_count(u64::from(u32::MAX), 1).unwrap(), u32::MAX);
    }

    #[test]
    fn test_fragment_count_overflow_is_an_error() {
        let result = fragment_count(u64::from(u32::MAX) + 1, 1);
        assert!(matches!(
            result,
            Err(TransferError::TooManyFragments { length, chunk_size: 1 }) if length == 1 << 32
        ));
        assert!(fragment_count(u64::MAX, 6144).is_err());
    }

    #[test]
    fn test_fragment_declaring_more_pieces_is_incomplete() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(ChunkDialectFactory::default());
        let receiver = FileReceiver::new(temp.path(), 4, factory.clone());

        let mut cached = ChunkDialect::new("a.txt", 4, 0, 1, b"abcd".to_vec());
        cached.meta_mut().set_owner_tag("peer");
        factory.write(&cached);

        let mut late = ChunkDialect::new("a.txt", 8, 1, 2, b"efgh".to_vec());
        late.meta_mut().set_owner_tag("peer");
        let result = receiver.receive(&late);

        assert!(matches!(
            result,
            Err(TransferError::Incomplete { received: 1, expected: 2, .. })
        ));
        assert!(!temp.path().join("a.txt").exists());
        assert_eq!(factory.fragment_count("peer", "a.txt"), 1);
    }

    #[test]
    fn test_fragments_cover_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("payload.bin");
        let content: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        fs::write(&path, &content).unwrap();

        let fragments: Vec<ChunkDialect> = FileSender::new(6144)
            .fragments(&path)
            .unwrap()
            .collect::<TransferResult<_>>()
            .unwrap();

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].length(), 6144);
        assert_eq!(fragments[1].length(), 3856);
        assert!(fragments[1].is_last());
        assert!(fragments.iter().all(|f| f.sign() == "payload.bin"));

        let joined: Vec<u8> = fragments.iter().flat_map(|f| f.data().to_vec()).collect();
        assert_eq!(joined, content);
    }

    #[test]
    fn test_empty_file_has_one_fragment() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty");
        fs::write(&path, b"").unwrap();

        let mut fragments = FileSender::new(16).fragments(&path).unwrap();
        assert_eq!(fragments.fragment_count(), 1);
        let only = fragments.next().unwrap().unwrap();
        assert_eq!(only.length(), 0);
        assert!(fragments.next().is_none());
    }

    #[test]
    fn test_receive_without_owner_never_completes() {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(ChunkDialectFactory::default());
        let receiver = FileReceiver::new(temp.path(), 4, factory);

        let chunk = ChunkDialect::new("a.txt", 3, 0, 1, b"abc".to_vec());
        let receipt = receiver.receive(&chunk).unwrap();
        assert_eq!(
            receipt,
            Receipt::Progress {
                sign: "a.txt".to_string(),
                processed: 3,
                total: 3,
            }
        );
    }

    #[test]
    fn test_sign_path_components_are_stripped() {
        assert_eq!(file_name("../../etc/passwd").unwrap(), "passwd");
        assert!(matches!(file_name(".."), Err(TransferError::InvalidSign(_))));
    }
}
