//! Shared key generation for storage backends.
//!
//! Upload keys: `uploads/{owner_id}/{processing_id}/{file_name}`.
//! Variant keys mirror the upload key under `processed/` with a tier suffix.

use crate::traits::{StorageError, StorageResult};

const UPLOAD_PREFIX: &str = "uploads/";
const PROCESSED_PREFIX: &str = "processed/";

/// Reduce a client-supplied file name to a single safe path segment.
///
/// Anything up to the last `/` or `\` is dropped and `..` runs are replaced,
/// so the result can never leave its owner's prefix.
pub fn sanitize_file_name(file_name: &str) -> String {
    let last_segment = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    let cleaned: String = last_segment
        .replace("..", "_")
        .chars()
        .filter(|c| !c.is_control())
        .collect();

    if cleaned.is_empty() || cleaned == "." {
        "file".to_string()
    } else {
        cleaned
    }
}

/// Key a client uploads its original to.
pub fn upload_key(owner_id: i64, processing_id: i64, file_name: &str) -> String {
    format!(
        "{}{}/{}/{}",
        UPLOAD_PREFIX,
        owner_id,
        processing_id,
        sanitize_file_name(file_name)
    )
}

/// Key of a derived variant of `source_key`.
///
/// The `uploads/` prefix becomes `processed/` and `_{suffix}` is inserted
/// before the extension. `extension` replaces the source extension when given.
pub fn processed_key(source_key: &str, suffix: &str, extension: Option<&str>) -> String {
    let relative = source_key
        .strip_prefix(UPLOAD_PREFIX)
        .unwrap_or(source_key)
        .trim_start_matches('/');

    let (dir, file) = match relative.rfind('/') {
        Some(idx) => (&relative[..=idx], &relative[idx + 1..]),
        None => ("", relative),
    };

    let (stem, source_ext) = match file.rfind('.') {
        Some(idx) if idx > 0 => (&file[..idx], Some(&file[idx + 1..])),
        _ => (file, None),
    };

    let mut key = format!("{}{}{}_{}", PROCESSED_PREFIX, dir, stem, suffix);
    if let Some(ext) = extension.or(source_ext) {
        key.push('.');
        key.push_str(ext);
    }
    key
}

/// Reject keys that could escape a backend's root.
pub fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() {
        return Err(StorageError::InvalidKey("Storage key is empty".to_string()));
    }
    if storage_key.contains("..") || storage_key.starts_with('/') || storage_key.contains('\\') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
