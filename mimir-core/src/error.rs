// mimir-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MimirError {
    // --- DOMAIN ERRORS (business rules, control graph, access control) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (IO, parsing, persistence) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- GENERIC / APPLICATION ---
    #[error("Internal error: {0}")]
    InternalError(String),
}

// Manual implementation to avoid a duplicate enum variant while keeping `?` ergonomics.
impl From<std::io::Error> for MimirError {
    fn from(err: std::io::Error) -> Self {
        MimirError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl MimirError {
    /// The stable error kind from §7, for domain errors; infra/internal
    /// errors surface their own kind for CLI exit-code mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Domain(e) => e.kind(),
            Self::Infrastructure(_) => "PERSISTENCE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}
