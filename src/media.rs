// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Media type <-> file extension lookup.
//!
//! One fixed table serves both directions: inline payloads pick an extension from their
//! declared media type, and retrieval infers a `Content-Type` from the stored extension.

/// Extension used when a media type has no entry in the table.
pub const DEFAULT_EXTENSION: &str = "bin";

/// Content type used when an extension has no entry in the table.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// `(media type, canonical extension)`. The first row for a media type wins when mapping
/// media type -> extension; every row is consulted for extension -> media type.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/jpeg", "jpeg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
    ("image/bmp", "bmp"),
    ("image/x-icon", "ico"),
    ("image/avif", "avif"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/html", "htm"),
    ("text/css", "css"),
    ("text/csv", "csv"),
    ("text/markdown", "md"),
    ("text/javascript", "js"),
    ("application/javascript", "js"),
    ("application/json", "json"),
    ("application/xml", "xml"),
    ("text/xml", "xml"),
    ("application/pdf", "pdf"),
    ("application/zip", "zip"),
    ("application/gzip", "gz"),
    ("application/x-tar", "tar"),
    ("application/wasm", "wasm"),
    ("audio/mpeg", "mp3"),
    ("audio/wav", "wav"),
    ("audio/ogg", "ogg"),
    ("video/mp4", "mp4"),
    ("video/webm", "webm"),
    ("font/woff2", "woff2"),
    ("application/octet-stream", "bin"),
];

/// Pick the extension (without the dot) for a media type such as `image/png`.
///
/// Parameters (`; charset=utf-8`) and letter case are ignored.
pub fn extension_for(media_type: &str) -> &'static str {
    let essence = media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    MEDIA_TYPES
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

/// Infer a content type from a file name's extension.
pub fn content_type_for(file_name: &str) -> &'static str {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return DEFAULT_CONTENT_TYPE;
    };
    let ext = ext.to_ascii_lowercase();

    MEDIA_TYPES
        .iter()
        .find(|(_, candidate)| *candidate == ext)
        .map(|(mime, _)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}
