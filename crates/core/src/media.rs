//! Payload metadata, content-type inference and artifact file naming.
//!
//! The content type declared here is sent to the credential broker and
//! must be repeated verbatim on the upload request, so it is fixed once
//! per payload and carried through the whole session.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::session::OutputArtifact;

// ---------------------------------------------------------------------------
// Content type constants
// ---------------------------------------------------------------------------

pub const CONTENT_TYPE_MPEG: &str = "audio/mpeg";
pub const CONTENT_TYPE_WAV: &str = "audio/wav";
pub const CONTENT_TYPE_FLAC: &str = "audio/flac";
pub const CONTENT_TYPE_OGG: &str = "audio/ogg";
pub const CONTENT_TYPE_MP4: &str = "audio/mp4";
pub const CONTENT_TYPE_AAC: &str = "audio/aac";

/// Extension -> content type lookup, lowercase extensions only.
const EXTENSION_CONTENT_TYPES: &[(&str, &str)] = &[
    ("mp3", CONTENT_TYPE_MPEG),
    ("wav", CONTENT_TYPE_WAV),
    ("flac", CONTENT_TYPE_FLAC),
    ("ogg", CONTENT_TYPE_OGG),
    ("m4a", CONTENT_TYPE_MP4),
    ("aac", CONTENT_TYPE_AAC),
];

/// Longest file name accepted by the broker.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Name used for a downloaded artifact whose kind is unusable.
const FALLBACK_ARTIFACT_NAME: &str = "artifact";

// ---------------------------------------------------------------------------
// PayloadMetadata
// ---------------------------------------------------------------------------

/// Name and declared content type of a payload about to be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadMetadata {
    pub file_name: String,
    pub content_type: String,
}

impl PayloadMetadata {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
        }
    }

    /// Build metadata from a file name, inferring the content type from its
    /// extension.
    pub fn from_file_name(file_name: impl Into<String>) -> Result<Self, CoreError> {
        let file_name = file_name.into();
        let content_type = content_type_for_file_name(&file_name).ok_or_else(|| {
            CoreError::Validation(format!(
                "Cannot infer content type for '{file_name}'. Supported extensions: {}",
                supported_extensions().join(", ")
            ))
        })?;
        Ok(Self::new(file_name, content_type))
    }

    /// Check the metadata before any remote call is made.
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_file_name(&self.file_name)?;
        validate_content_type(&self.content_type)
    }
}

// ---------------------------------------------------------------------------
// Validation functions
// ---------------------------------------------------------------------------

/// A file name must be non-empty, at most [`MAX_FILE_NAME_LEN`] bytes and
/// free of path separators.
pub fn validate_file_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "File name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_FILE_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "File name exceeds {MAX_FILE_NAME_LEN} bytes"
        )));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(CoreError::Validation(format!(
            "File name must not contain path separators, got: '{name}'"
        )));
    }
    Ok(())
}

/// A content type must have the `type/subtype` shape with no whitespace.
pub fn validate_content_type(content_type: &str) -> Result<(), CoreError> {
    let valid = match content_type.split_once('/') {
        Some((kind, subtype)) => {
            !kind.is_empty()
                && !subtype.is_empty()
                && !subtype.contains('/')
                && !content_type.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(CoreError::Validation(format!(
            "Content type must look like 'type/subtype', got: '{content_type}'"
        )))
    }
}

// ---------------------------------------------------------------------------
// Content type inference
// ---------------------------------------------------------------------------

/// Content type for a file name based on its extension (case-insensitive).
pub fn content_type_for_file_name(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    EXTENSION_CONTENT_TYPES
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, content_type)| *content_type)
}

/// All extensions [`content_type_for_file_name`] recognises.
pub fn supported_extensions() -> Vec<&'static str> {
    EXTENSION_CONTENT_TYPES.iter().map(|(ext, _)| *ext).collect()
}

// ---------------------------------------------------------------------------
// Artifact naming
// ---------------------------------------------------------------------------

/// Local file name for a downloaded artifact: its kind plus the extension
/// of the locator's path, e.g. `vocals.wav`.
///
/// The kind is reduced to a single safe path segment; query strings and
/// fragments on the locator are ignored.
pub fn artifact_file_name(artifact: &OutputArtifact) -> String {
    let stem: String = artifact
        .kind
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let stem = if stem.is_empty() {
        FALLBACK_ARTIFACT_NAME.to_string()
    } else {
        stem
    };

    match locator_extension(&artifact.locator) {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem,
    }
}

/// Extension of the last path segment of a URL, if it has a sane one.
fn locator_extension(url: &str) -> Option<String> {
    let clean = url.split('?').next().unwrap_or(url);
    let clean = clean.split('#').next().unwrap_or(clean);

    let path = match clean
        .strip_prefix("https://")
        .or_else(|| clean.strip_prefix("http://"))
    {
        Some(rest) => rest.find('/').map(|i| &rest[i..]).unwrap_or(""),
        None => clean,
    };

    let segment = path.rsplit('/').find(|s| !s.is_empty())?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
