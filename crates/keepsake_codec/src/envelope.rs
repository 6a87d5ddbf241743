//! The snapshot codec and its envelope format.

use crate::compact::{expand_keys, shorten_keys, strip_nulls};
use crate::crypto::{random_salt, KeyMaterial, SALT_SIZE};
use crate::error::{CodecError, CodecResult};
use crate::secrets::{extract_secrets, restore_secrets, DEFAULT_SENSITIVE_KEYS};
use crate::snapshot::PlayerSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;

/// Magic bytes at the start of every payload.
pub const MAGIC: [u8; 4] = *b"KSNP";
/// Current payload format version.
pub const FORMAT_VERSION: u16 = 1;
/// Prefix size (magic + version + header_len).
const PREFIX_SIZE: usize = 4 + 2 + 4;
/// Upper bound for a decompressed body.
const MAX_BODY_SIZE: u64 = 1024 * 1024 * 1024;

/// Options for [`SnapshotCodec`].
#[derive(Debug, Clone)]
pub struct CodecOptions {
    /// Key names whose values are sealed instead of compressed.
    pub sensitive_keys: Vec<String>,
    /// zstd compression level (1-22).
    pub compression_level: i32,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self {
            sensitive_keys: DEFAULT_SENSITIVE_KEYS
                .iter()
                .map(|k| (*k).to_string())
                .collect(),
            compression_level: 3,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct Header {
    user_id: String,
    updated_at: u64,
    /// Short-code dictionary for array-element keys.
    dictionary: Vec<String>,
    /// Length of the CBOR body before compression.
    body_len: u64,
    secrets: Option<SealedSecrets>,
}

#[derive(Serialize, Deserialize)]
struct SealedSecrets {
    salt: Vec<u8>,
    sealed: Vec<u8>,
}

/// Compacts, protects and compresses snapshots, and reverses it.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCodec {
    options: CodecOptions,
}

impl SnapshotCodec {
    /// Creates a codec with the given options.
    #[must_use]
    pub fn new(options: CodecOptions) -> Self {
        Self { options }
    }

    /// Returns the codec options.
    #[must_use]
    pub fn options(&self) -> &CodecOptions {
        &self.options
    }

    /// Cheap size estimate of a snapshot before compaction.
    #[must_use]
    pub fn estimate_size(&self, snapshot: &PlayerSnapshot) -> u64 {
        snapshot.estimated_size()
    }

    /// Turns a snapshot into a protected payload.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization, compression or encryption fails.
    pub fn compact(&self, snapshot: &PlayerSnapshot, key: &KeyMaterial) -> CodecResult<Vec<u8>> {
        let mut body = Value::Object(snapshot.sections.clone().into_iter().collect());
        strip_nulls(&mut body);

        let secrets = extract_secrets(&mut body, &self.options.sensitive_keys);
        let dictionary = shorten_keys(&mut body);

        let mut cbor = Vec::new();
        ciborium::into_writer(&body, &mut cbor)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        let compressed = compress(&cbor, self.options.compression_level)
            .map_err(|e| CodecError::encoding_failed(format!("compression failed: {e}")))?;

        let secrets = if secrets.is_empty() {
            None
        } else {
            let plaintext = serde_json::to_vec(&secrets)
                .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
            let salt = random_salt();
            let sealed = key
                .derive(&salt)?
                .seal(&plaintext, &associated_data(&snapshot.user_id))?;
            Some(SealedSecrets {
                salt: salt.to_vec(),
                sealed,
            })
        };

        let header = Header {
            user_id: snapshot.user_id.clone(),
            updated_at: snapshot.updated_at,
            dictionary,
            body_len: cbor.len() as u64,
            secrets,
        };
        let mut header_bytes = Vec::new();
        ciborium::into_writer(&header, &mut header_bytes)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        let header_len = u32::try_from(header_bytes.len())
            .map_err(|_| CodecError::encoding_failed("header too large"))?;

        let mut out = Vec::with_capacity(PREFIX_SIZE + header_bytes.len() + compressed.len());
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Turns a payload produced by [`compact`](Self::compact) back into a
    /// snapshot.
    ///
    /// Either the whole snapshot is returned or an error; nothing partial.
    ///
    /// # Errors
    ///
    /// Returns a decode error on bad magic, unknown version, truncation,
    /// malformed CBOR, failed decompression, unknown short codes or failed
    /// authentication of the sealed secrets.
    pub fn expand(&self, payload: &[u8], key: &KeyMaterial) -> CodecResult<PlayerSnapshot> {
        if payload.len() < PREFIX_SIZE {
            return Err(CodecError::Truncated);
        }
        if payload[0..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = u16::from_le_bytes([payload[4], payload[5]]);
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion {
                found: version,
                supported: FORMAT_VERSION,
            });
        }
        let header_len =
            u32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]) as usize;
        let body_start = PREFIX_SIZE
            .checked_add(header_len)
            .filter(|end| *end <= payload.len())
            .ok_or(CodecError::Truncated)?;

        let header: Header = ciborium::from_reader(&payload[PREFIX_SIZE..body_start])
            .map_err(|e| CodecError::invalid_structure(format!("header: {e}")))?;
        if header.body_len > MAX_BODY_SIZE {
            return Err(CodecError::invalid_structure("declared body too large"));
        }

        // Output is capped at the declared length so a lying header cannot
        // inflate past it.
        let cbor = zstd::bulk::decompress(&payload[body_start..], header.body_len as usize)
            .map_err(|e| CodecError::decompression_failed(e.to_string()))?;
        if cbor.len() as u64 != header.body_len {
            return Err(CodecError::invalid_structure(format!(
                "body length mismatch: expected {}, got {}",
                header.body_len,
                cbor.len()
            )));
        }

        let mut body: Value = ciborium::from_reader(cbor.as_slice())
            .map_err(|e| CodecError::invalid_structure(format!("body: {e}")))?;
        expand_keys(&mut body, &header.dictionary)?;

        if let Some(sealed) = header.secrets {
            if sealed.salt.len() != SALT_SIZE {
                return Err(CodecError::invalid_structure("bad salt length"));
            }
            let plaintext = key
                .derive(&sealed.salt)?
                .open(&sealed.sealed, &associated_data(&header.user_id))?;
            let secrets: BTreeMap<String, Value> = serde_json::from_slice(&plaintext)
                .map_err(|e| CodecError::invalid_structure(format!("secrets: {e}")))?;
            restore_secrets(&mut body, secrets)?;
        }

        let Value::Object(map) = body else {
            return Err(CodecError::invalid_structure("body is not an object"));
        };

        Ok(PlayerSnapshot {
            user_id: header.user_id,
            updated_at: header.updated_at,
            sections: map.into_iter().collect(),
        })
    }
}

/// zstd with a content checksum so corruption is caught at decompression.
fn compress(data: &[u8], level: i32) -> std::io::Result<Vec<u8>> {
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), level)?;
    encoder.include_checksum(true)?;
    encoder.write_all(data)?;
    encoder.finish()
}

/// Binds sealed secrets to the format version and the snapshot owner.
fn associated_data(user_id: &str) -> Vec<u8> {
    let mut aad = Vec::with_capacity(MAGIC.len() + 2 + user_id.len());
    aad.extend_from_slice(&MAGIC);
    aad.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    aad.extend_from_slice(user_id.as_bytes());
    aad
}
