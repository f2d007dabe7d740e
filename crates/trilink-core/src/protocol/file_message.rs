//! File-message JSON body.
//!
//! File and group-file messages carry a compact JSON object with
//! single-letter keys. Absent fields are omitted on encode and tolerated
//! on decode.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Rendering type: regular file attachment.
pub const RENDERING_FILE: u8 = 0;

/// Rendering type: inline media.
pub const RENDERING_MEDIA: u8 = 1;

/// Rendering type: sticker.
pub const RENDERING_STICKER: u8 = 2;

/// The JSON body of a file message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMessageBody {
    /// Rendering type (`j`).
    #[serde(rename = "j", default)]
    pub rendering: u8,

    /// Legacy rendering flag (`i`); kept for older receivers.
    #[serde(rename = "i", default)]
    pub legacy_rendering: u8,

    /// Hex-encoded blob key (`k`).
    #[serde(rename = "k")]
    pub blob_key: String,

    /// Hex-encoded blob id of the file ciphertext (`b`).
    #[serde(rename = "b")]
    pub blob_id: String,

    /// Media type of the file (`m`).
    #[serde(rename = "m")]
    pub media_type: String,

    /// Original file name (`n`).
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,

    /// File size in bytes (`s`).
    #[serde(rename = "s")]
    pub file_size: u64,

    /// Caption shown with the file (`d`).
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    /// Free-form metadata object (`x`), e.g. image dimensions.
    #[serde(rename = "x", default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,

    /// Hex-encoded blob id of the thumbnail ciphertext (`t`).
    #[serde(rename = "t", default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_blob_id: Option<String>,

    /// Media type of the thumbnail (`p`).
    #[serde(rename = "p", default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_media_type: Option<String>,

    /// Correlation id grouping related messages (`c`).
    #[serde(rename = "c", default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl FileMessageBody {
    /// Encode as compact JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from JSON bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FileMessageBody {
        FileMessageBody {
            rendering: RENDERING_MEDIA,
            legacy_rendering: 1,
            blob_key: "aa".repeat(32),
            blob_id: "bb".repeat(16),
            media_type: "image/jpeg".into(),
            file_name: Some("photo.jpg".into()),
            file_size: 12345,
            caption: None,
            metadata: Some(serde_json::json!({"h": 480, "w": 640})),
            thumbnail_blob_id: Some("cc".repeat(16)),
            thumbnail_media_type: Some("image/jpeg".into()),
            correlation_id: None,
        }
    }

    #[test]
    fn test_roundtrip() {
        let body = sample();
        let decoded = FileMessageBody::decode(&body.encode().expect("encode")).expect("decode");
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_absent_fields_are_omitted() {
        let encoded = sample().encode().expect("encode");
        let text = String::from_utf8(encoded).expect("utf8");
        assert!(text.contains("\"j\":"));
        assert!(text.contains("\"k\":"));
        assert!(!text.contains("\"d\":"));
        assert!(!text.contains("\"c\":"));
    }

    #[test]
    fn test_minimal_object_decodes() {
        let decoded = FileMessageBody::decode(
            br#"{"k":"00","b":"11","m":"application/octet-stream","s":9}"#,
        )
        .expect("decode");
        assert_eq!(decoded.rendering, RENDERING_FILE);
        assert_eq!(decoded.file_size, 9);
        assert_eq!(decoded.file_name, None);
    }
}
