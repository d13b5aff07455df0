//! `data:` URL encoding for inlined images.

use crate::error::{MenuError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// MIME type of every normalized image.
pub const JPEG_MIME: &str = "image/jpeg";

const SCHEME: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// Build `data:{mime};base64,{payload}`.
pub fn encode(mime: &str, bytes: &[u8]) -> String {
    format!("{}{}{},{}", SCHEME, mime, BASE64_MARKER, STANDARD.encode(bytes))
}

/// Split a base64 data URL into its MIME type and decoded payload.
pub fn decode(url: &str) -> Result<(String, Vec<u8>)> {
    let rest = url
        .strip_prefix(SCHEME)
        .ok_or_else(|| MenuError::InvalidDataUrl("missing data: scheme".into()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| MenuError::InvalidDataUrl("missing ',' separator".into()))?;

    let mime = header
        .strip_suffix(BASE64_MARKER)
        .ok_or_else(|| MenuError::InvalidDataUrl("only base64 payloads are supported".into()))?;

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| MenuError::InvalidDataUrl(e.to_string()))?;

    Ok((mime.to_string(), bytes))
}
