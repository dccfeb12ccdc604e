use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;
use std::io::{Read, Write};
use weft_core::{WeftError, WeftResult};

/// A checkpoint context as it will be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedContext {
    /// Either the original JSON or a base64 string of its gzip encoding.
    pub context: Value,
    /// Whether `context` is the compressed form.
    pub compressed: bool,
    /// Bytes of `context` as stored.
    pub size_bytes: u64,
}

/// Encode `context` for storage, compressing it when its JSON is larger than
/// `threshold` bytes.
pub fn encode(context: &Value, threshold: usize) -> WeftResult<EncodedContext> {
    let raw = serde_json::to_vec(context)?;
    if raw.len() <= threshold {
        return Ok(EncodedContext {
            context: context.clone(),
            compressed: false,
            size_bytes: raw.len() as u64,
        });
    }

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let packed = BASE64.encode(encoder.finish()?);
    Ok(EncodedContext {
        size_bytes: packed.len() as u64,
        context: Value::String(packed),
        compressed: true,
    })
}

/// Recover the original JSON from a stored context.
pub fn decode(context: &Value, compressed: bool) -> WeftResult<Value> {
    if !compressed {
        return Ok(context.clone());
    }
    let packed = context
        .as_str()
        .ok_or_else(|| WeftError::Codec("compressed context is not a string".into()))?;
    let gz = BASE64
        .decode(packed)
        .map_err(|e| WeftError::Codec(format!("invalid base64: {e}")))?;
    let mut raw = Vec::new();
    GzDecoder::new(gz.as_slice())
        .read_to_end(&mut raw)
        .map_err(|e| WeftError::Codec(format!("invalid gzip stream: {e}")))?;
    Ok(serde_json::from_slice(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_small_context_stays_plain() {
        let context = json!({"step": 3});
        let encoded = encode(&context, 1024).unwrap();
        assert!(!encoded.compressed);
        assert_eq!(encoded.context, context);
        assert_eq!(encoded.size_bytes, br#"{"step":3}"#.len() as u64);
    }

    #[test]
    fn test_large_context_compresses_and_restores() {
        let context = json!({"log": "x".repeat(4096)});
        let encoded = encode(&context, 1024).unwrap();
        assert!(encoded.compressed);
        assert!(encoded.context.is_string());
        assert!(encoded.size_bytes < 4096);
        assert_eq!(decode(&encoded.context, true).unwrap(), context);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode(&json!({"not": "packed"}), true),
            Err(WeftError::Codec(_))
        ));
        assert!(matches!(
            decode(&json!("!!!"), true),
            Err(WeftError::Codec(_))
        ));
    }
}
