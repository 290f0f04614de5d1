//! Key handles and record-type-specific key resolution.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;

/// Field name under which the key directory travels alongside incoming data.
pub const KEYS_FIELD: &str = "keys";

/// Cheap-to-clone handle to symmetric key material.
#[derive(Clone, PartialEq, Eq)]
pub struct RecordKey(Arc<[u8]>);

impl RecordKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into().into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// Key material stays out of logs and debug output.
impl fmt::Debug for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordKey({} bytes)", self.0.len())
    }
}

/// Record-type-specific key lookup strategy.
///
/// `directory` is whatever arrived under [`KEYS_FIELD`] in the incoming data,
/// commonly a JSON object mapping identifiers to encoded key material
/// (`Value::Null` when the field was absent). The default implementation
/// resolves nothing; concrete record types supply their own strategy: by
/// record id, by parent relationship, and so on. Returning `None` means
/// "no key available yet", never an error.
pub trait KeyResolver: Send + Sync {
    fn find_key(&self, directory: &Value) -> Option<RecordKey> {
        let _ = directory;
        None
    }
}

/// Resolver that never finds a key.
pub struct NullResolver;

impl KeyResolver for NullResolver {}

/// Looks up a fixed record id in an object-shaped directory whose values are
/// base64-encoded key material. Entries that are missing, empty, or not valid
/// base64 resolve to no key.
pub struct IdKeyResolver {
    record_id: String,
}

impl IdKeyResolver {
    pub fn new(record_id: impl Into<String>) -> Self {
        Self {
            record_id: record_id.into(),
        }
    }
}

impl KeyResolver for IdKeyResolver {
    fn find_key(&self, directory: &Value) -> Option<RecordKey> {
        let encoded = directory.get(&self.record_id)?.as_str()?;
        if encoded.is_empty() {
            return None;
        }
        let bytes = BASE64.decode(encoded).ok()?;
        Some(RecordKey::new(bytes))
    }
}
