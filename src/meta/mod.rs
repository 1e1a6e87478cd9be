//! Version metadata records.
//!
//! Two small JSON files describe which snapshot of the document store a
//! deployment holds: the shared record (written by the export script and
//! distributed with the snapshot) and the local record (this machine's view).
//! Both carry an integer version and the list of collections in the snapshot.
//!
//! Reads never fail: a missing or unreadable record is reported as version 0,
//! which makes the next start import rather than refuse to boot. Writes only
//! touch the version and collection keys and keep everything else the record
//! already holds.

mod error;

pub use error::MetaError;

use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Key holding the snapshot version.
pub const VERSION_KEY: &str = "dbVersion";

/// Key holding the ordered list of managed collections.
pub const COLLECTIONS_KEY: &str = "colecciones";

/// In-memory view of one version record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    /// Snapshot version, 0 when unknown.
    pub version: u64,
    /// Collections included in the snapshot, in record order.
    pub collections: Vec<String>,
}

impl VersionRecord {
    fn from_object(object: &Map<String, Value>) -> Self {
        let version = object.get(VERSION_KEY).map(parse_version).unwrap_or(0);
        let collections = object
            .get(COLLECTIONS_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            version,
            collections,
        }
    }
}

/// Locations of the shared and local records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaPaths {
    pub shared: PathBuf,
    pub local: PathBuf,
}

impl MetaPaths {
    pub fn new(shared: impl Into<PathBuf>, local: impl Into<PathBuf>) -> Self {
        Self {
            shared: shared.into(),
            local: local.into(),
        }
    }
}

/// Read the version stored at `path`.
///
/// Returns 0 when the file is absent, unreadable or malformed.
pub fn read_version(path: &Path) -> u64 {
    read_record(path).version
}

/// Read the whole record stored at `path`, defaulting on any failure.
pub fn read_record(path: &Path) -> VersionRecord {
    match load_object(path) {
        Ok(Some(object)) => VersionRecord::from_object(&object),
        Ok(None) => VersionRecord::default(),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "treating unreadable version record as version 0");
            VersionRecord::default()
        }
    }
}

/// Set the version (and optionally the collections) of the record at `path`.
///
/// Keys other than the version and collection keys are preserved. A corrupt
/// existing record is replaced. The file is written through a temporary
/// sibling and renamed into place.
pub fn write_version(
    path: &Path,
    version: u64,
    collections: Option<&[String]>,
) -> Result<(), MetaError> {
    let mut object = match load_object(path) {
        Ok(existing) => existing.unwrap_or_default(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "replacing corrupt version record");
            Map::new()
        }
    };

    object.insert(VERSION_KEY.to_string(), Value::from(version));
    if let Some(collections) = collections {
        object.insert(
            COLLECTIONS_KEY.to_string(),
            Value::Array(collections.iter().cloned().map(Value::String).collect()),
        );
    }

    let contents = serde_json::to_string_pretty(&Value::Object(object))
        .map_err(|e| MetaError::serialize(path, e))?;
    write_atomic(path, contents.as_bytes())?;

    info!(path = %path.display(), version, "version record updated");
    Ok(())
}

/// Replace the record at `dest` with an exact copy of the record at `source`.
pub fn mirror(source: &Path, dest: &Path) -> Result<(), MetaError> {
    let contents = fs::read(source).map_err(|e| MetaError::read(source, e))?;
    write_atomic(dest, &contents)?;
    debug!(source = %source.display(), dest = %dest.display(), "version record mirrored");
    Ok(())
}

/// Load the record at `path` as a JSON object, `None` if it does not exist.
fn load_object(path: &Path) -> Result<Option<Map<String, Value>>, MetaError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(MetaError::read(path, e)),
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Object(object)) => Ok(Some(object)),
        Ok(other) => Err(MetaError::malformed(
            path,
            format!("found {}", json_kind(&other)),
        )),
        Err(e) => Err(MetaError::malformed(path, e.to_string())),
    }
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), MetaError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MetaError::write(path, e))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "meta.json".to_string());
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    fs::write(&tmp_path, contents).map_err(|e| MetaError::write(&tmp_path, e))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(MetaError::write(path, e));
    }
    Ok(())
}

/// Interpret a stored version value.
///
/// Accepts non-negative integers, floats (truncated toward zero) and numeric
/// strings. Floats outside the `u64` range read as 0.
fn parse_version(value: &Value) -> u64 {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && *f >= 0.0 && *f < U64_LIMIT)
                    .map(|f| f.trunc() as u64)
            })
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

// 2^64, the first float past `u64::MAX`.
const U64_LIMIT: f64 = 18_446_744_073_709_551_616.0;

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
