use thiserror::Error;

/// Errors surfaced by the protected-body pipeline.
///
/// All variants are terminal for the merge attempt that produced them;
/// nothing is retried automatically. "No body present" and "no key resolved
/// yet" are normal outcomes, not errors, and never appear here.
#[derive(Debug, Error)]
pub enum BodyError {
    /// The encoded body could not be turned into ciphertext bytes.
    #[error("Body decode failed: {0}")]
    Decode(String),

    /// Decryption failed: wrong key, corrupted ciphertext, or authentication
    /// failure.
    #[error("Body decryption failed: {0}")]
    Decrypt(String),

    /// The decrypted plaintext is not a valid JSON object.
    #[error("Body parse failed: {0}")]
    Parse(String),
}
