//! Config persistence and atomic file writes

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use super::NucleusConfig;
use super::error::{StorageError, StorageResult};

/// Write `data` to `path` atomically
///
/// Writes a sibling temp file, syncs it, renames it over `path`, then syncs
/// the parent directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> StorageResult<()> {
    let temp_path = path.with_extension("tmp");
    let failed = |detail: String| StorageError::AtomicWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    let mut file = File::create(&temp_path)
        .map_err(|err| failed(format!("create {}: {err}", temp_path.display())))?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
        .map_err(|err| failed(format!("rename from {}: {err}", temp_path.display())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new().read(true).open(parent)?;
        dir.sync_all()?;
    }

    Ok(())
}

/// Write a nucleus configuration as pretty JSON, creating parent directories
pub fn save_config(path: &Path, config: &NucleusConfig) -> StorageResult<()> {
    let json = serde_json::to_vec_pretty(config)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    write_atomic(path, &json)?;
    tracing::debug!(path = %path.display(), "wrote nucleus config");
    Ok(())
}

/// Write a nucleus configuration, with file context on failure
pub fn write_config(path: &Path, config: &NucleusConfig) -> Result<()> {
    save_config(path, config).with_context(|| format!("Failed to write config: {:?}", path))
}

/// Read a nucleus configuration; absent fields take their defaults
pub fn read_config(path: &Path) -> StorageResult<NucleusConfig> {
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

/// Load a nucleus configuration, with file context on failure
pub fn load_config(path: &Path) -> Result<NucleusConfig> {
    read_config(path).with_context(|| format!("Failed to load config: {:?}", path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::talk::ParseMode;
    use crate::talk::dialect::ReadOrder;
    use tempfile::TempDir;

    #[test]
    fn test_config_round_trip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("conf").join("nucleus.json");

        let mut config = NucleusConfig::default();
        config.action.max_workers = 4;
        config.chunk.read_order = ReadOrder::Declared;
        config.parse_mode = ParseMode::Strict;

        write_config(&path, &config).unwrap();
        assert!(!path.with_extension("tmp").exists());

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nucleus.json");
        fs::write(&path, br#"{"chunk": {"chunk_size": 1024}}"#).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.chunk.chunk_size, 1024);
        assert_eq!(loaded.action.max_workers, 32);
        assert!(loaded.tag.is_none());
    }

    #[test]
    fn test_save_config_reports_storage_errors() {
        let temp = TempDir::new().unwrap();
        // A regular file where the parent directory should be
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, b"").unwrap();

        let result = save_config(&blocker.join("nucleus.json"), &NucleusConfig::default());
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn test_malformed_config_is_a_json_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nucleus.json");
        fs::write(&path, b"{\"action\": ").unwrap();

        assert!(matches!(read_config(&path), Err(StorageError::Json(_))));
        assert!(matches!(
            read_config(&temp.path().join("missing.json")),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn test_write_atomic_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("data.bin");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }
}
