//! Records with one encrypted field.
//!
//! A [`ProtectedRecord`] keeps most of its fields in the clear but stores one
//! designated field (`"body"` by default) as an opaque ciphertext blob.
//! [`ProtectedRecord::merge`] applies incoming plain fields synchronously and
//! routes the body through an asynchronous decode → decrypt → parse →
//! merge-back chain, so callers never block on crypto work.
//!
//! Key lookup is record-type-specific and pluggable via [`KeyResolver`]; the
//! decryption primitive is pluggable via [`Decryptor`], with [`AesGcmCipher`]
//! as the stock AES-256-GCM implementation.

pub mod cipher;
pub mod codec;
pub mod error;
pub mod keys;
pub mod protected;

pub use cipher::{AesGcmCipher, Decryptor};
pub use codec::detect_and_decode;
pub use error::BodyError;
pub use keys::{IdKeyResolver, KeyResolver, NullResolver, RecordKey, KEYS_FIELD};
pub use protected::{BodyOutcome, MergeData, ProtectedRecord, RecordOptions, DEFAULT_BODY_FIELD};
