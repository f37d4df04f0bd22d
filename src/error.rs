//! Parse error taxonomy.
//!
//! Parsing is all-or-nothing: every error aborts document construction.
//! Defaults (120 qpm, C major) are substituted only when data is absent,
//! never when it is present but malformed.

use thiserror::Error;

/// Errors raised while loading or parsing a MusicXML document.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The file or archive could not be read, or its contents are
    /// ambiguous (e.g. multiple candidate score files in an .mxl).
    #[error("failed to load score: {0}")]
    Load(String),

    /// A required child element or attribute is missing or non-numeric.
    #[error("malformed <{element}> element: {detail}")]
    MalformedElement {
        element: &'static str,
        detail: String,
    },

    /// A measure declared more than one time signature. Polymeter is
    /// unsupported by design.
    #[error("multiple time signatures in measure {measure}")]
    MultipleTimeSignature { measure: String },
}

impl ParseError {
    pub(crate) fn malformed(element: &'static str, detail: impl Into<String>) -> Self {
        ParseError::MalformedElement {
            element,
            detail: detail.into(),
        }
    }
}
