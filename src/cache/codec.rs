//! Compression Codec Module
//!
//! Turns serializable values into storable text blobs and back.
//!
//! A blob is a two-character tag followed by a body:
//! - `r:` raw JSON, used for values at or under the compression threshold
//! - `z:` base64 of gzip-compressed JSON

use std::io::{Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{CacheError, Result};

const RAW_TAG: &str = "r:";
const GZIP_TAG: &str = "z:";

// == Blob ==
/// Opaque storable form of a cached value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blob(String);

impl Blob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the body is gzip output.
    pub fn is_compressed(&self) -> bool {
        self.0.starts_with(GZIP_TAG)
    }

    /// Bytes the body occupies, excluding the tag.
    pub fn stored_size(&self) -> u64 {
        self.0.len().saturating_sub(RAW_TAG.len()) as u64
    }
}

/// A compressed value together with its serialized size.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub blob: Blob,
    pub original_size: u64,
}

impl Encoded {
    /// Stored size over original size.
    pub fn ratio(&self) -> f64 {
        compression_ratio(self.blob.stored_size(), self.original_size)
    }
}

// == Codec ==
/// Serializes and compresses values above a size threshold.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    threshold: usize,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Codec {
    pub fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Byte length of the serialized form.
    pub fn size<T: Serialize + ?Sized>(&self, value: &T) -> Result<usize> {
        serialize(value).map(|bytes| bytes.len())
    }

    /// True iff the serialized form is larger than the threshold.
    pub fn should_compress<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool> {
        Ok(self.size(value)? > self.threshold)
    }

    /// Serializes `value`, gzipping it when it exceeds the threshold.
    pub fn compress<T: Serialize + ?Sized>(&self, value: &T) -> Result<Encoded> {
        let json = serialize(value)?;
        let original_size = json.len() as u64;

        let blob = if json.len() > self.threshold {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&json)
                .map_err(|e| CacheError::Encoding(e.to_string()))?;
            let packed = encoder
                .finish()
                .map_err(|e| CacheError::Encoding(e.to_string()))?;
            format!("{}{}", GZIP_TAG, STANDARD.encode(packed))
        } else {
            // serde_json output is always valid UTF-8
            let text =
                String::from_utf8(json).map_err(|e| CacheError::Encoding(e.to_string()))?;
            format!("{}{}", RAW_TAG, text)
        };

        Ok(Encoded {
            blob: Blob(blob),
            original_size,
        })
    }

    /// Reverses [`Codec::compress`].
    pub fn decompress<T: DeserializeOwned>(&self, blob: &Blob) -> Result<T> {
        let json = unpack(blob)?;
        serde_json::from_slice(&json).map_err(|e| CacheError::Decoding(e.to_string()))
    }
}

/// `compressed / original`, 1.0 when there is nothing to compare.
pub fn compression_ratio(compressed: u64, original: u64) -> f64 {
    if original == 0 {
        1.0
    } else {
        compressed as f64 / original as f64
    }
}

fn serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| CacheError::Encoding(e.to_string()))
}

fn unpack(blob: &Blob) -> Result<Vec<u8>> {
    let text = blob.as_str();
    let bytes = if let Some(body) = text.strip_prefix(GZIP_TAG) {
        let packed = STANDARD
            .decode(body)
            .map_err(|e| CacheError::Decoding(e.to_string()))?;
        let mut out = Vec::new();
        GzDecoder::new(packed.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| CacheError::Decoding(e.to_string()))?;
        out
    } else if let Some(body) = text.strip_prefix(RAW_TAG) {
        body.as_bytes().to_vec()
    } else {
        return Err(CacheError::Decoding("unknown blob tag".to_string()));
    };

    if bytes.is_empty() {
        return Err(CacheError::Decoding("empty payload".to_string()));
    }
    Ok(bytes)
}
