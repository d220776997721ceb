//! Best-effort projections of stored byte blobs for API consumption.
//!
//! Events and deliveries persist bodies as the exact bytes seen on the wire.
//! The read APIs project those bytes into JSON: decode `Content-Encoding`
//! first, then parse as JSON when the payload looks like JSON, otherwise fall
//! back to a UTF-8 string. The stored bytes are never touched.

use std::io::Read;

use flate2::read::{GzDecoder, ZlibDecoder};
use serde_json::Value;

/// Decode a body according to its `Content-Encoding`.
///
/// Unknown encodings and decode failures pass the original bytes through.
pub fn decode_content_encoding(bytes: &[u8], encoding: Option<&str>) -> Vec<u8> {
    let encoding = encoding.map(|e| e.trim().to_ascii_lowercase());
    match encoding.as_deref() {
        Some("gzip") | Some("x-gzip") => {
            let mut out = Vec::new();
            match GzDecoder::new(bytes).read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => bytes.to_vec(),
            }
        }
        Some("deflate") => {
            let mut out = Vec::new();
            match ZlibDecoder::new(bytes).read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => bytes.to_vec(),
            }
        }
        Some("br") => {
            let mut out = Vec::new();
            match brotli::Decompressor::new(bytes, 4096).read_to_end(&mut out) {
                Ok(_) => out,
                Err(_) => bytes.to_vec(),
            }
        }
        _ => bytes.to_vec(),
    }
}

/// Project a delivery attempt's response body.
///
/// Valid JSON becomes the parsed value, any other bytes become a UTF-8
/// string, an empty or absent body becomes null.
pub fn project_response_body(bytes: Option<&[u8]>) -> Value {
    let Some(bytes) = bytes else {
        return Value::Null;
    };
    if bytes.is_empty() {
        return Value::Null;
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())),
        Err(_) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Project a captured event body.
///
/// The body is decoded per `Content-Encoding`, then parsed as JSON when the
/// `Content-Type` indicates JSON or the first non-whitespace byte is `{` or
/// `[`. Everything else is projected as a UTF-8 string.
pub fn project_event_body(
    bytes: &[u8],
    content_type: Option<&str>,
    content_encoding: Option<&str>,
) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    let decoded = decode_content_encoding(bytes, content_encoding);
    if looks_like_json(&decoded, content_type) {
        if let Ok(value) = serde_json::from_slice::<Value>(&decoded) {
            return value;
        }
    }
    Value::String(String::from_utf8_lossy(&decoded).into_owned())
}

fn looks_like_json(bytes: &[u8], content_type: Option<&str>) -> bool {
    if content_type
        .map(|ct| ct.to_ascii_lowercase().contains("json"))
        .unwrap_or(false)
    {
        return true;
    }
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .map(|b| *b == b'{' || *b == b'[')
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::{Compression, write::GzEncoder};

    use super::*;

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decode_gzip() {
        let compressed = gzip(br#"{"x":1}"#);
        assert_eq!(
            decode_content_encoding(&compressed, Some("gzip")),
            br#"{"x":1}"#
        );
    }

    #[test]
    fn test_decode_brotli() {
        let mut compressed = Vec::new();
        {
            let mut writer = brotli::CompressorWriter::new(&mut compressed, 4096, 5, 22);
            writer.write_all(b"hello brotli").unwrap();
        }
        assert_eq!(
            decode_content_encoding(&compressed, Some("br")),
            b"hello brotli"
        );
    }

    #[test]
    fn test_decode_unknown_encoding_passes_through() {
        assert_eq!(
            decode_content_encoding(b"raw bytes", Some("zstd")),
            b"raw bytes"
        );
        assert_eq!(decode_content_encoding(b"raw bytes", None), b"raw bytes");
    }

    #[test]
    fn test_decode_corrupt_gzip_passes_through() {
        assert_eq!(
            decode_content_encoding(b"not gzip at all", Some("gzip")),
            b"not gzip at all"
        );
    }

    #[test]
    fn test_project_response_body() {
        assert_eq!(project_response_body(None), Value::Null);
        assert_eq!(project_response_body(Some(b"")), Value::Null);
        assert_eq!(
            project_response_body(Some(br#"{"ok":true}"#)),
            serde_json::json!({"ok": true})
        );
        assert_eq!(
            project_response_body(Some(b"plain text")),
            Value::String("plain text".to_string())
        );
        // Invalid UTF-8 falls back to a lossy string.
        let projected = project_response_body(Some(&[0xff, 0xfe, b'a']));
        assert!(matches!(projected, Value::String(_)));
    }

    #[test]
    fn test_project_event_body_json_by_content_type() {
        let value = project_event_body(br#"{"a":[1,2]}"#, Some("application/json"), None);
        assert_eq!(value, serde_json::json!({"a": [1, 2]}));
    }

    #[test]
    fn test_project_event_body_json_by_sniffing() {
        let value = project_event_body(b"  [1,2,3]", Some("text/plain"), None);
        assert_eq!(value, serde_json::json!([1, 2, 3]));
    }

    #[test]
    fn test_project_event_body_invalid_json_stays_string() {
        let value = project_event_body(b"{not json", None, None);
        assert_eq!(value, Value::String("{not json".to_string()));
    }

    #[test]
    fn test_project_event_body_decodes_before_parsing() {
        let compressed = gzip(br#"{"n":7}"#);
        let value = project_event_body(&compressed, Some("application/json"), Some("gzip"));
        assert_eq!(value, serde_json::json!({"n": 7}));
    }
}
