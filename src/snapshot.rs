//! Snapshot files: LZ4-framed bincode with atomic replace-on-save.

use std::fs;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use bincode::Options;
use tracing::info;

use crate::error::IndexError;

/// Magic bytes identifying LZ4-compressed snapshot files.
pub const LZ4_MAGIC: &[u8; 4] = b"LZ4S";

/// Upper bound on the LZ4 expansion of a snapshot blob. Decoded sizes past
/// `compressed * MAX_EXPANSION` are treated as corruption.
const MAX_EXPANSION: u64 = 256;

/// Decode limit for a blob of `compressed_len` bytes on disk.
pub(crate) fn decode_limit(compressed_len: u64) -> u64 {
    compressed_len.saturating_mul(MAX_EXPANSION).saturating_add(4096)
}

/// Bincode decode with the same wire layout as `bincode::deserialize_from`,
/// but refusing any length prefix that would read past `limit` bytes.
pub(crate) fn deserialize_bounded<T, R>(reader: R, limit: u64) -> bincode::Result<T>
where
    T: serde::de::DeserializeOwned,
    R: Read,
{
    bincode::options()
        .with_fixint_encoding()
        .allow_trailing_bytes()
        .with_limit(limit)
        .deserialize_from(reader)
}

/// Write `path` through a sibling temp file renamed into place, so readers
/// only ever see the previous or the complete new snapshot.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), IndexError>
where
    F: FnOnce(&mut BufWriter<fs::File>) -> Result<(), IndexError>,
{
    let save_err = |message: String| IndexError::SnapshotSave {
        path: path.display().to_string(),
        message,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| save_err(format!("cannot create directory: {}", e)))?;
    }

    let tmp = tmp_path(path);
    let file = fs::File::create(&tmp).map_err(|e| save_err(format!("cannot create file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    let result = write(&mut writer).and_then(|_| {
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    });
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(save_err(e.to_string()));
    }
    drop(writer);

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        save_err(format!("cannot replace snapshot: {}", e))
    })
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Save a serializable value to a file with LZ4 frame compression.
/// Writes magic bytes, then LZ4-compressed bincode data.
pub fn save_compressed<T: serde::Serialize>(path: &Path, data: &T, label: &str) -> Result<(), IndexError> {
    let start = Instant::now();

    write_atomic(path, |writer| {
        writer.write_all(LZ4_MAGIC)?;
        let mut encoder = lz4_flex::frame::FrameEncoder::new(writer);
        bincode::serialize_into(&mut encoder, data)?;
        encoder.finish().map_err(std::io::Error::other)?;
        Ok(())
    })?;

    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    info!(
        label,
        path = %path.display(),
        size_kb = size / 1024,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Snapshot saved"
    );
    Ok(())
}

/// Load a value saved by [`save_compressed`]. A missing file yields `Ok(None)`;
/// anything without the LZ4 magic is rejected.
pub fn load_compressed<T: serde::de::DeserializeOwned>(path: &Path, label: &str) -> Result<Option<T>, IndexError> {
    let path_str = path.display().to_string();
    let load_err = |message: String| IndexError::SnapshotLoad {
        path: path_str.clone(),
        message,
    };
    let start = Instant::now();

    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(load_err(format!("cannot open file: {}", e))),
    };
    let file_len = file
        .metadata()
        .map_err(|e| load_err(format!("cannot stat file: {}", e)))?
        .len();
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| load_err(format!("read error (magic bytes): {}", e)))?;
    if &magic != LZ4_MAGIC {
        return Err(load_err("not a snapshot (bad magic bytes)".to_string()));
    }

    let decoder = lz4_flex::frame::FrameDecoder::new(reader);
    let value = deserialize_bounded(decoder, decode_limit(file_len))
        .map_err(|e| load_err(format!("deserialization failed: {}", e)))?;

    info!(
        label,
        elapsed_ms = format_args!("{:.1}", start.elapsed().as_secs_f64() * 1000.0),
        "Snapshot loaded"
    );
    Ok(Some(value))
}
