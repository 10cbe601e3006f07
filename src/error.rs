use serde::Serialize;
use thiserror::Error;

/// Session-level failures.
///
/// `InvalidDocument` and `FocusAcquisition` end a run before anything is typed or
/// during refocus; everything else that can go wrong while typing is absorbed
/// into the returned report.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("could not establish input focus: {0:#}")]
    FocusAcquisition(anyhow::Error),

    #[error("surface content unavailable after {attempts} capture attempts")]
    VerificationUnavailable { attempts: u32 },

    #[error("invalid session options: {0}")]
    InvalidOptions(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}

/// A single character that could not be delivered to the surface.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("could not type {ch:?}: {reason}")]
pub struct SynthesisError {
    pub ch: char,
    pub reason: String,
}
