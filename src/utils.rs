//! Utility functions for file naming and path manipulation

use crate::error::{Error, PublishError, Result};
use rand::Rng;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE, HeaderMap};
use std::path::{Path, PathBuf};

/// Maximum number of suffixes tried when resolving file collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Minimum length (in characters) for a URL basename to count as a real file name
const MIN_URL_NAME_LEN: usize = 5;

/// Extension used when the content type is unknown
const FALLBACK_EXTENSION: &str = ".bin";

/// Known content types and the extension their files get
const CONTENT_TYPE_EXTENSIONS: &[(&str, &str)] = &[
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/gif", ".gif"),
    ("image/webp", ".webp"),
    ("image/bmp", ".bmp"),
    ("image/svg+xml", ".svg"),
    ("image/avif", ".avif"),
    ("application/pdf", ".pdf"),
];

/// Get a path that does not exist yet by appending `_1`, `_2`, ... to the file stem
///
/// The extension (only the last one) is kept after the suffix.
///
/// # Examples
///
/// ```
/// use asset_dl::utils::get_unique_path;
///
/// # #[tokio::main]
/// # async fn main() -> asset_dl::Result<()> {
/// let dir = tempfile::tempdir()?;
/// let path = dir.path().join("a.png");
/// assert_eq!(get_unique_path(&path).await?, path);
///
/// std::fs::write(&path, b"x")?;
/// assert_eq!(get_unique_path(&path).await?, dir.path().join("a_1.png"));
/// # Ok(())
/// # }
/// ```
pub async fn get_unique_path(path: &Path) -> Result<PathBuf> {
    if !tokio::fs::try_exists(path).await? {
        return Ok(path.to_path_buf());
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).ok_or_else(|| {
        Error::Publish(PublishError::InvalidPath {
            path: path.to_path_buf(),
            reason: "Cannot extract file stem".to_string(),
        })
    })?;
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().ok_or_else(|| {
        Error::Publish(PublishError::InvalidPath {
            path: path.to_path_buf(),
            reason: "Cannot extract parent directory".to_string(),
        })
    })?;

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let new_name = match extension {
            Some(ext) => format!("{stem}_{i}.{ext}"),
            None => format!("{stem}_{i}"),
        };
        let new_path = parent.join(new_name);
        if !tokio::fs::try_exists(&new_path).await? {
            return Ok(new_path);
        }
    }

    Err(Error::Publish(PublishError::FileCollision {
        path: path.to_path_buf(),
        reason: format!("no free name after {MAX_RENAME_ATTEMPTS} attempts"),
    }))
}

/// A fresh 32-character lowercase hex token
pub fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().r#gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Derive the logical file name of a download
///
/// Tried in order:
/// 1. `Content-Disposition` header (`filename*=` preferred over `filename=`), URL-decoded
/// 2. The last URL path segment, URL-decoded, if it has an extension and at
///    least five characters
/// 3. `file_<random>` plus an extension looked up from `Content-Type`
///    (`.bin` for unknown types)
///
/// Names from the first two tiers are reduced to a single path component; a
/// name that sanitizes to nothing falls through to the next tier.
pub fn derive_filename(headers: &HeaderMap, url: &str) -> String {
    if let Some(name) = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_content_disposition)
    {
        return name;
    }

    if let Some(name) = filename_from_url(url) {
        return name;
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    format!(
        "file_{}{}",
        random_token(),
        extension_for_content_type(content_type)
    )
}

/// Parse a file name out of a `Content-Disposition` header value
///
/// Handles `filename="a.png"`, `filename=a.png` and RFC 5987
/// `filename*=UTF-8''a%20b.png`.
pub fn filename_from_content_disposition(value: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;

    for part in value.split(';') {
        let part = part.trim();
        let Some((key, raw)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'');

        if key == "filename*" {
            // charset'lang'encoded-filename
            let encoded = raw.rfind('\'').map_or(raw, |idx| &raw[idx + 1..]);
            extended = Some(percent_decode(encoded));
        } else if key == "filename" {
            plain = Some(percent_decode(raw));
        }
    }

    extended
        .and_then(|n| sanitize_file_name(&n))
        .or_else(|| plain.and_then(|n| sanitize_file_name(&n)))
}

/// Use the last URL path segment as a file name if it looks like one
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    let decoded = percent_decode(last);

    if !decoded.contains('.') || decoded.chars().count() < MIN_URL_NAME_LEN {
        return None;
    }
    sanitize_file_name(&decoded)
}

/// Extension (with leading dot) for a `Content-Type` header value
pub fn extension_for_content_type(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return FALLBACK_EXTENSION;
    };
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    CONTENT_TYPE_EXTENSIONS
        .iter()
        .find(|(known, _)| *known == mime)
        .map_or(FALLBACK_EXTENSION, |(_, ext)| ext)
}

/// Reduce a name to a single, usable path component
///
/// Anything up to the last `/` or `\` is dropped. Returns None for names that
/// end up empty, `.` or `..`, or that contain NUL.
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return None;
    }
    Some(base.to_string())
}

fn percent_decode(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_string(), |d| d.into_owned())
}
