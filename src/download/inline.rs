// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `data:` URI decoding for inline payloads.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;

use super::error::TransferError;
use crate::media::extension_for;
use crate::utils::unix_millis;

/// Standard alphabet, padding optional (browsers accept both).
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded inline payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl InlinePayload {
    /// Synthesized storage name: `file-<unix millis>.<ext>`.
    pub fn file_name(&self) -> String {
        format!("file-{}.{}", unix_millis(), extension_for(&self.media_type))
    }
}

/// Decode `data:[<media type>][;param]*[;base64],<data>`.
///
/// An omitted media type defaults to `text/plain`. Without `;base64` the data is
/// percent-decoded.
pub fn decode_data_uri(raw: &str) -> Result<InlinePayload, TransferError> {
    let rest = raw
        .get(..5)
        .filter(|scheme| scheme.eq_ignore_ascii_case("data:"))
        .map(|_| &raw[5..])
        .ok_or_else(|| TransferError::InvalidPayload("not a data URI".into()))?;

    let (header, data) = rest
        .split_once(',')
        .ok_or_else(|| TransferError::InvalidPayload("missing ',' before the payload".into()))?;

    let mut params = header.split(';').map(str::trim);
    let media_type = match params.next() {
        Some(mime) if !mime.is_empty() => mime.to_ascii_lowercase(),
        _ => "text/plain".to_string(),
    };
    let is_base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

    let bytes = if is_base64 {
        let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let compact = urlencoding::decode(&compact)
            .map(|s| s.into_owned())
            .unwrap_or(compact);
        LENIENT_BASE64
            .decode(compact.as_bytes())
            .map_err(|e| TransferError::InvalidPayload(format!("bad base64: {}", e)))?
    } else {
        urlencoding::decode_binary(data.as_bytes()).into_owned()
    };

    Ok(InlinePayload { media_type, bytes })
}
