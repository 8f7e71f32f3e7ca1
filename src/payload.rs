//! Save payload codec.
//!
//! Section records travel as `zstd,` followed by base64 of the
//! zstd-compressed JSON array. The decoder also accepts plain JSON, which is
//! what the store hands back for drafts saved without compression.

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::Cursor;

/// Prefix marking a compressed payload.
pub const COMPRESSED_PREFIX: &str = "zstd,";

/// Serialize and compress a payload.
pub fn encode_records<T: Serialize + ?Sized>(records: &T) -> Result<String> {
    let json = serde_json::to_vec(records).context("Failed to serialize save payload")?;
    let compressed =
        zstd::stream::encode_all(Cursor::new(json), 0).context("Failed to compress save payload")?;

    Ok(format!(
        "{}{}",
        COMPRESSED_PREFIX,
        general_purpose::STANDARD.encode(compressed)
    ))
}

/// Decode a payload produced by [`encode_records`], or plain JSON.
pub fn decode_records<T: DeserializeOwned>(content: &str) -> Result<T> {
    let Some(encoded) = content.strip_prefix(COMPRESSED_PREFIX) else {
        return serde_json::from_str(content).context("Failed to parse uncompressed payload");
    };

    let compressed = general_purpose::STANDARD
        .decode(encoded.trim())
        .context("Payload is not valid base64")?;
    let json = zstd::stream::decode_all(Cursor::new(compressed))
        .context("Failed to decompress payload")?;

    serde_json::from_slice(&json).context("Failed to parse decompressed payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_encoded_payload_has_prefix() {
        let encoded = encode_records(&json!([{"content": "hola"}])).unwrap();
        assert!(encoded.starts_with(COMPRESSED_PREFIX));
        assert!(!encoded.contains("hola"));
    }

    #[test]
    fn test_decode_reverses_encode() {
        let records = json!([
            {"content": "<p>Hola</p>", "sectionId": "cxTargetSection1", "validate": true, "origin": "Google"},
            {"content": "<p>Hello</p>", "sectionId": "cxSourceSection1", "validate": false, "origin": "source"}
        ]);
        let decoded: Value = decode_records(&encode_records(&records).unwrap()).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let records = json!([{"content": "日本語"}]);
        assert_eq!(
            encode_records(&records).unwrap(),
            encode_records(&records).unwrap()
        );
    }

    #[test]
    fn test_decode_accepts_plain_json() {
        let decoded: Value = decode_records(r#"[{"content":"x"}]"#).unwrap();
        assert_eq!(decoded[0]["content"], "x");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_records::<Value>("zstd,@@@not base64@@@").is_err());
        assert!(decode_records::<Value>("zstd,aGVsbG8=").is_err());
        assert!(decode_records::<Value>("not json").is_err());
    }
}
