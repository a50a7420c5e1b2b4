//! Crate-wide error types.
//!
//! Mirrors the error kinds the organizer's design calls out explicitly:
//! validation failures at the request boundary, transient vs. permanent LLM
//! failures, transient vs. permanent entity-store failures, and malformed
//! model responses. Reconciliation issues (directory paths, hallucinated
//! names, fuzzy-resolved names, omitted files) are never modeled as errors
//! here — they travel as `warnings` on a successful `OrganizePlan`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrganizerError>;

#[derive(Error, Debug)]
pub enum OrganizerError {
    /// The inbound request failed a structural or size check before any
    /// network call was made.
    #[error("validation error: {0}")]
    Validation(String),

    /// The LLM provider returned 429/503 or the request failed at the
    /// network layer. Callers should retry with backoff.
    #[error("LLM provider transient failure: {0}")]
    LlmTransient(String),

    /// The LLM provider returned a 4xx other than 429. Not retryable.
    #[error("LLM provider permanent failure: {0}")]
    LlmPermanent(String),

    /// The LLM response had no `choices`, or was otherwise not a usable
    /// chat-completion payload.
    #[error("LLM response malformed: {0}")]
    LlmMalformed(String),

    /// The model's `choices[0].message.content` did not parse as JSON, or
    /// parsed but failed structural validation (4.E fatal checks).
    #[error("bad LLM response content: {0}")]
    BadResponse(String),

    /// The entity store returned a CAS conflict or a network-layer failure.
    /// Retryable; CAS conflicts must refetch the tip before retrying.
    #[error("entity store transient failure: {0}")]
    StoreTransient(String),

    /// The entity store returned a 4xx, or the entity did not exist.
    #[error("entity store permanent failure: {0}")]
    StorePermanent(String),

    #[error("persistence error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrganizerError {
    /// True when the failure is worth retrying with backoff (4.G, 4.I, 4.J).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrganizerError::LlmTransient(_) | OrganizerError::StoreTransient(_)
        )
    }
}
