//! License serialization: structured license files and compact keys.
//!
//! # License file
//!
//! Pretty-printed JSON with camelCase field names and nested objects for
//! client, product, terms and binding.
//!
//! # Compact key
//!
//! `FOS-<EDITION>-<PAYLOAD>-<CHECKSUM>`
//!
//! - `EDITION`: three-letter edition code (`PRO`, `ENT`, ...)
//! - `PAYLOAD`: compact JSON, raw-deflate compressed, base64url without padding
//! - `CHECKSUM`: first four hex characters of SHA-256 over `PAYLOAD`
//!
//! The base64url alphabet contains `-`, so the payload is everything
//! between the edition code and the last separator.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tracing::debug;

use crate::document::{LicenseDocument, FORMAT_VERSION};
use crate::error::{LicenseError, LicenseResult};
use crate::hash::{short_checksum, CHECKSUM_HEX_LEN};

/// Leading token of every compact key.
pub const KEY_PREFIX: &str = "FOS";

/// Extension of license files.
pub const LICENSE_FILE_EXTENSION: &str = "lic";

/// Format versions this engine can read.
pub const SUPPORTED_FORMAT_VERSIONS: &[&str] = &[FORMAT_VERSION];

/// Upper bound on decompressed payload size.
const MAX_PAYLOAD_BYTES: u64 = 1024 * 1024;

/// Serialization format of license content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseFormat {
    /// Structured license file.
    File,
    /// Compact key string.
    CompactKey,
    Unknown,
}

/// Three-letter code for an edition name.
///
/// Known editions map to fixed codes; others use their first three
/// alphanumeric characters, uppercased and padded with `X`.
#[must_use]
pub fn edition_code(edition: &str) -> String {
    match edition.trim().to_ascii_lowercase().as_str() {
        "professional" => "PRO".to_string(),
        "enterprise" => "ENT".to_string(),
        "standard" => "STD".to_string(),
        "trial" => "TRL".to_string(),
        "education" => "EDU".to_string(),
        _ => {
            let mut code: String = edition
                .chars()
                .filter(char::is_ascii_alphanumeric)
                .take(3)
                .collect::<String>()
                .to_ascii_uppercase();
            while code.len() < 3 {
                code.push('X');
            }
            code
        }
    }
}

/// Guesses the format of `content`.
#[must_use]
pub fn detect_format(content: &str) -> LicenseFormat {
    let trimmed = content.trim_start();
    if trimmed.starts_with('{') {
        LicenseFormat::File
    } else if trimmed
        .strip_prefix(KEY_PREFIX)
        .is_some_and(|rest| rest.starts_with('-'))
    {
        LicenseFormat::CompactKey
    } else {
        LicenseFormat::Unknown
    }
}

/// Cheap shape check of a compact key, without decoding it.
#[must_use]
pub fn validate_key_format(key: &str) -> bool {
    split_key(key).is_ok()
}

/// Decodes license content in either format.
///
/// # Errors
///
/// Returns a corruption error if the content is neither format or fails to
/// decode, and `UnsupportedVersion` for an unknown `formatVersion`.
pub fn auto_parse(content: &str) -> LicenseResult<LicenseDocument> {
    match detect_format(content) {
        LicenseFormat::File => from_file_string(content),
        LicenseFormat::CompactKey => decode_key(content),
        LicenseFormat::Unknown => Err(LicenseError::InvalidText(
            "content is neither a license file nor a license key".into(),
        )),
    }
}

/// Serializes a document as license file text.
pub fn to_file_string(doc: &LicenseDocument) -> LicenseResult<String> {
    Ok(serde_json::to_string_pretty(doc)?)
}

/// Parses license file text.
pub fn from_file_string(content: &str) -> LicenseResult<LicenseDocument> {
    let value: serde_json::Value = serde_json::from_str(content)
        .map_err(|e| LicenseError::InvalidText(format!("not a license file: {e}")))?;
    check_version(&value)?;
    serde_json::from_value(value).map_err(|e| LicenseError::Corrupted(e.to_string()))
}

/// Writes a license file, creating parent directories. The content is
/// written to a sibling temporary file and renamed into place.
///
/// # Errors
///
/// Returns `Io` on filesystem failures.
pub fn save_to_file(doc: &LicenseDocument, path: &Path) -> LicenseResult<()> {
    let content = to_file_string(doc)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    let written = fs::File::create(tmp_path)
        .and_then(|mut file| {
            file.write_all(content.as_bytes())?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(tmp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(tmp_path);
        return Err(e.into());
    }

    debug!(path = %path.display(), license_id = %doc.id, "saved license file");
    Ok(())
}

/// Reads and parses a license file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, otherwise a decode error.
pub fn load_from_file(path: &Path) -> LicenseResult<LicenseDocument> {
    let content = fs::read_to_string(path)?;
    auto_parse(&content)
}

/// Encodes a document as a compact key.
pub fn encode_key(doc: &LicenseDocument) -> LicenseResult<String> {
    let json = serde_json::to_vec(doc)?;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;

    let payload = URL_SAFE_NO_PAD.encode(compressed);
    let checksum = short_checksum(&payload);
    Ok(format!(
        "{KEY_PREFIX}-{}-{payload}-{checksum}",
        edition_code(&doc.product.edition)
    ))
}

/// Decodes a compact key.
///
/// The checksum is verified before any decompression.
///
/// # Errors
///
/// - `InvalidKeyFormat`: wrong prefix or shape
/// - `ChecksumMismatch`: payload does not match its checksum
/// - `Decompression`: payload is not base64url or not deflate data
/// - `InvalidText`: decompressed payload is not license JSON
pub fn decode_key(key: &str) -> LicenseResult<LicenseDocument> {
    let parts = split_key(key)?;

    let actual = short_checksum(parts.payload);
    if !actual.eq_ignore_ascii_case(parts.checksum) {
        return Err(LicenseError::ChecksumMismatch {
            expected: parts.checksum.to_ascii_uppercase(),
            actual,
        });
    }

    let compressed = URL_SAFE_NO_PAD
        .decode(parts.payload.trim_end_matches('='))
        .map_err(|e| LicenseError::Decompression(format!("payload is not base64url: {e}")))?;

    let mut json = Vec::new();
    DeflateDecoder::new(compressed.as_slice())
        .take(MAX_PAYLOAD_BYTES + 1)
        .read_to_end(&mut json)
        .map_err(|e| LicenseError::Decompression(e.to_string()))?;
    if json.len() as u64 > MAX_PAYLOAD_BYTES {
        return Err(LicenseError::Decompression("payload too large".into()));
    }

    let text = String::from_utf8(json)
        .map_err(|_| LicenseError::InvalidText("payload is not UTF-8".into()))?;
    let doc = from_file_string(&text)?;

    if edition_code(&doc.product.edition) != parts.edition {
        return Err(LicenseError::Corrupted(format!(
            "edition code {} does not match payload edition {}",
            parts.edition, doc.product.edition
        )));
    }
    Ok(doc)
}

struct KeyParts<'a> {
    edition: &'a str,
    payload: &'a str,
    checksum: &'a str,
}

fn split_key(key: &str) -> LicenseResult<KeyParts<'_>> {
    let key = key.trim();
    let bad = |msg: &str| LicenseError::InvalidKeyFormat(msg.to_string());

    let rest = key
        .strip_prefix(KEY_PREFIX)
        .and_then(|r| r.strip_prefix('-'))
        .ok_or_else(|| bad("missing key prefix"))?;
    let (edition, rest) = rest.split_once('-').ok_or_else(|| bad("missing edition code"))?;
    let (payload, checksum) = rest.rsplit_once('-').ok_or_else(|| bad("missing checksum"))?;

    if edition.len() != 3
        || !edition
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        return Err(bad("edition code must be three of [A-Z0-9]"));
    }
    if payload.is_empty()
        || !payload
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(bad("payload contains characters outside base64url"));
    }
    if checksum.len() != CHECKSUM_HEX_LEN || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(bad("checksum must be four hex characters"));
    }

    Ok(KeyParts {
        edition,
        payload,
        checksum,
    })
}

fn check_version(value: &serde_json::Value) -> LicenseResult<()> {
    let version = value
        .get("formatVersion")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| LicenseError::Corrupted("missing formatVersion".into()))?;
    if SUPPORTED_FORMAT_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(LicenseError::UnsupportedVersion(version.to_string()))
    }
}
