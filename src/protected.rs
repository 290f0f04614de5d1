//! Protected records: the merge override and the decrypt pipeline.
//!
//! A record's plain fields merge synchronously on the caller's thread. The
//! ciphertext body never reaches the plain merge: it is withheld, decoded,
//! decrypted on the blocking pool, parsed, and merged back as one spawned
//! task whose handle the caller may await or drop.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cipher::Decryptor;
use crate::codec::detect_and_decode;
use crate::error::BodyError;
use crate::keys::{KeyResolver, RecordKey, KEYS_FIELD};

/// Default name of the field holding ciphertext.
pub const DEFAULT_BODY_FIELD: &str = "body";

/// Name of the identity field.
const ID_FIELD: &str = "id";

// ============================================================================
// MergeData
// ============================================================================

/// Incoming merge data: either a mapping or an ordered key/value sequence.
///
/// Both shapes normalize to the same insertion-ordered map at the [`merge`]
/// boundary; later duplicates in a sequence win, as they would in a map.
///
/// [`merge`]: ProtectedRecord::merge
pub enum MergeData {
    Map(Map<String, Value>),
    Pairs(Vec<(String, Value)>),
}

impl MergeData {
    fn into_map(self) -> Map<String, Value> {
        match self {
            MergeData::Map(map) => map,
            MergeData::Pairs(pairs) => pairs.into_iter().collect(),
        }
    }
}

impl From<Map<String, Value>> for MergeData {
    fn from(map: Map<String, Value>) -> Self {
        MergeData::Map(map)
    }
}

impl From<Vec<(String, Value)>> for MergeData {
    fn from(pairs: Vec<(String, Value)>) -> Self {
        MergeData::Pairs(pairs)
    }
}

// ============================================================================
// BodyOutcome
// ============================================================================

/// What happened to the body field of a merge.
#[derive(Debug)]
pub enum BodyOutcome {
    /// No pipeline work: the record is in raw mode, or the incoming data
    /// carried no string-valued body field.
    Skipped,
    /// A ciphertext body was present but no key has resolved yet. The raw
    /// ciphertext was kept on the record and decryption deferred until a
    /// later merge arrives with usable key material.
    Deferred,
    /// The decrypt chain was launched; the handle resolves with the parsed
    /// body object once decrypt, parse, and merge-back complete.
    Started(JoinHandle<Result<Value, BodyError>>),
}

impl BodyOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, BodyOutcome::Skipped)
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, BodyOutcome::Deferred)
    }

    /// The pipeline handle, if a decrypt task was launched.
    pub fn into_handle(self) -> Option<JoinHandle<Result<Value, BodyError>>> {
        match self {
            BodyOutcome::Started(handle) => Some(handle),
            _ => None,
        }
    }
}

// ============================================================================
// RecordOptions
// ============================================================================

/// Construction-time options for a [`ProtectedRecord`]. All of these are
/// fixed for the record's lifetime.
#[derive(Default)]
pub struct RecordOptions {
    /// Name of the ciphertext field. Defaults to [`DEFAULT_BODY_FIELD`].
    pub body_field: Option<String>,
    /// When true, incoming data is already fully decrypted and the pipeline
    /// is bypassed entirely (e.g. data loaded from a local plaintext cache).
    pub raw_mode: bool,
    /// Ordered names of fields always considered non-sensitive. The identity
    /// field is always included. Defaults to `["id"]`. Informational
    /// metadata for collaborators; not enforced here.
    pub public_fields: Option<Vec<String>>,
    /// Names of fields considered sensitive. Informational.
    pub private_fields: Vec<String>,
}

// ============================================================================
// ProtectedRecord
// ============================================================================

/// A mutable record whose designated body field holds ciphertext.
///
/// Constructed behind an `Arc` because the decrypt pipeline mutates the
/// record from a background task. Field storage and the key slot each sit
/// behind their own lock; locks are never held across an await point.
pub struct ProtectedRecord {
    body_field: String,
    public_fields: Vec<String>,
    private_fields: Vec<String>,
    raw_mode: bool,
    key: Mutex<Option<RecordKey>>,
    fields: Mutex<Map<String, Value>>,
    resolver: Arc<dyn KeyResolver>,
    decryptor: Arc<dyn Decryptor>,
}

impl ProtectedRecord {
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        decryptor: Arc<dyn Decryptor>,
        opts: RecordOptions,
    ) -> Arc<Self> {
        let mut public_fields = opts
            .public_fields
            .unwrap_or_else(|| vec![ID_FIELD.to_string()]);
        if !public_fields.iter().any(|f| f == ID_FIELD) {
            public_fields.insert(0, ID_FIELD.to_string());
        }
        Arc::new(Self {
            body_field: opts
                .body_field
                .unwrap_or_else(|| DEFAULT_BODY_FIELD.to_string()),
            public_fields,
            private_fields: opts.private_fields,
            raw_mode: opts.raw_mode,
            key: Mutex::new(None),
            fields: Mutex::new(Map::new()),
            resolver,
            decryptor,
        })
    }

    pub fn body_field(&self) -> &str {
        &self.body_field
    }

    pub fn raw_mode(&self) -> bool {
        self.raw_mode
    }

    pub fn public_fields(&self) -> &[String] {
        &self.public_fields
    }

    pub fn private_fields(&self) -> &[String] {
        &self.private_fields
    }

    /// Snapshot of the record's current fields.
    pub fn fields(&self) -> Map<String, Value> {
        self.fields.lock().clone()
    }

    /// Current value of a single field, if set.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.lock().get(name).cloned()
    }

    /// The record's identity, if set.
    pub fn id(&self) -> Option<String> {
        let fields = self.fields.lock();
        fields
            .get(ID_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// The resolved decryption key, if any.
    pub fn key(&self) -> Option<RecordKey> {
        self.key.lock().clone()
    }

    /// Drop the resolved key (e.g. after key rotation); the next decrypt
    /// attempt resolves again.
    pub fn clear_key(&self) {
        *self.key.lock() = None;
    }

    /// Resolve the record's decryption key, at most once.
    ///
    /// A previously resolved key is returned as-is without consulting the
    /// resolver. Otherwise the key directory is pulled from `data` under
    /// [`KEYS_FIELD`] and handed to the record's [`KeyResolver`]; a
    /// successful lookup is stored for the record's lifetime. The key slot's
    /// lock is held across resolution, so concurrent attempts cannot
    /// double-assign. `None` means "cannot proceed yet", never an error.
    pub fn ensure_key(&self, data: &Map<String, Value>) -> Option<RecordKey> {
        let mut slot = self.key.lock();
        if let Some(key) = slot.as_ref() {
            return Some(key.clone());
        }
        let directory = data.get(KEYS_FIELD).unwrap_or(&Value::Null);
        let key = self.resolver.find_key(directory)?;
        *slot = Some(key.clone());
        Some(key)
    }

    /// Apply a mapping's fields to the record directly, without decryption.
    ///
    /// This is the generic field-assignment operation; the merge override
    /// guarantees ciphertext never reaches it.
    pub fn merge_plain(&self, mapping: &Map<String, Value>) {
        let mut fields = self.fields.lock();
        for (name, value) in mapping {
            fields.insert(name.clone(), value.clone());
        }
    }

    /// Merge incoming data into the record.
    ///
    /// Every field except the body applies synchronously via
    /// [`merge_plain`]. The key directory under [`KEYS_FIELD`] is consumed
    /// for resolution only and is never stored as a record field. A
    /// string-valued body is withheld from the plain merge and routed
    /// through [`process_body`] instead; the returned
    /// outcome says whether a decrypt task was launched and carries its
    /// handle when one was. This call never blocks on crypto work, and the
    /// pipeline task runs to completion whether or not the handle is kept.
    ///
    /// In raw mode the data is applied unchanged, body included, and the
    /// pipeline is never invoked.
    ///
    /// Concurrent merges on one record are not ordered relative to each
    /// other; serialize per record if ordering of body updates matters.
    ///
    /// Must be called from within a tokio runtime when a body may be
    /// present.
    ///
    /// [`merge_plain`]: Self::merge_plain
    /// [`process_body`]: Self::process_body
    pub fn merge(self: &Arc<Self>, data: impl Into<MergeData>) -> BodyOutcome {
        let mut mapping = data.into().into_map();

        if self.raw_mode {
            self.merge_plain(&mapping);
            return BodyOutcome::Skipped;
        }

        // The key directory is transport metadata for resolution, never a
        // record field.
        let keys = mapping.remove(KEYS_FIELD);
        // Only a string-valued body is ciphertext; anything else merges like
        // any other field.
        let body = match mapping.get(&self.body_field) {
            Some(Value::String(_)) => mapping.remove(&self.body_field),
            _ => None,
        };
        self.merge_plain(&mapping);

        match body {
            Some(value) => {
                // Reinserted locally only; the record sees the body through
                // the pipeline, or as raw ciphertext when decryption defers.
                mapping.insert(self.body_field.clone(), value);
                if let Some(directory) = keys {
                    mapping.insert(KEYS_FIELD.to_string(), directory);
                }
                self.process_body(&mapping)
            }
            None => BodyOutcome::Skipped,
        }
    }

    /// Route the body field of `data` through decode → decrypt → parse →
    /// merge-back.
    ///
    /// Returns [`BodyOutcome::Skipped`] when `data` has no string-valued
    /// body field (the record is left untouched), and
    /// [`BodyOutcome::Deferred`] when no decryption key resolves; the raw
    /// ciphertext is written to the record's body field so a present body is
    /// never silently dropped. Otherwise the asynchronous chain is launched
    /// and its handle returned immediately. Decryption runs on the blocking
    /// pool and its failures come back through the handle as values; nothing
    /// panics across the task boundary.
    pub fn process_body(self: &Arc<Self>, data: &Map<String, Value>) -> BodyOutcome {
        let body = match data.get(&self.body_field).and_then(Value::as_str) {
            Some(body) => body.to_string(),
            None => return BodyOutcome::Skipped,
        };

        let key = match self.ensure_key(data) {
            Some(key) => key,
            None => {
                debug!(
                    field = %self.body_field,
                    "no key resolved; deferring body decryption"
                );
                self.fields
                    .lock()
                    .insert(self.body_field.clone(), Value::String(body));
                return BodyOutcome::Deferred;
            }
        };

        let record = Arc::clone(self);
        let decryptor = Arc::clone(&self.decryptor);
        let handle = tokio::spawn(async move {
            let result = decrypt_parse_merge(&record, &decryptor, &body, &key).await;
            if let Err(ref err) = result {
                warn!(error = %err, "body decrypt pipeline failed");
            }
            result
        });
        BodyOutcome::Started(handle)
    }
}

/// The asynchronous tail: one unit of work per body.
async fn decrypt_parse_merge(
    record: &Arc<ProtectedRecord>,
    decryptor: &Arc<dyn Decryptor>,
    body: &str,
    key: &RecordKey,
) -> Result<Value, BodyError> {
    let bytes = detect_and_decode(body)?;

    let decryptor = Arc::clone(decryptor);
    let key = key.clone();
    let plaintext = tokio::task::spawn_blocking(move || decryptor.decrypt(&key, &bytes))
        .await
        .map_err(|e| BodyError::Decrypt(format!("decrypt task failed: {e}")))??;

    let text = String::from_utf8(plaintext)
        .map_err(|e| BodyError::Parse(format!("plaintext is not UTF-8: {e}")))?;
    let parsed: Value = serde_json::from_str(&text).map_err(|e| BodyError::Parse(e.to_string()))?;
    let object = match &parsed {
        Value::Object(map) => map.clone(),
        _ => {
            return Err(BodyError::Parse(
                "decrypted body is not an object".to_string(),
            ))
        }
    };

    // Merge-back runs under the fields lock with plain-merge semantics; the
    // pipeline never re-enters itself. Ciphertext retained by an earlier
    // deferral is superseded by the decrypted contents, so the body field is
    // cleared unless the parsed object supplies one of its own.
    {
        let mut fields = record.fields.lock();
        if !object.contains_key(&record.body_field) {
            fields.remove(&record.body_field);
        }
        for (name, value) in &object {
            fields.insert(name.clone(), value.clone());
        }
    }
    Ok(parsed)
}
