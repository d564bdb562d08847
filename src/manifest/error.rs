//! Error types for playlist parsing and variant selection.

use thiserror::Error;

/// Errors produced while parsing playlist text.
///
/// Any of these is fatal for a job: no partial-manifest reasoning is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The text is not an M3U8 document.
    #[error("malformed playlist at {base_uri}: {reason}")]
    Malformed {
        /// Base URI of the playlist being parsed.
        base_uri: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// The playlist declares neither variants nor segments.
    #[error("playlist at {base_uri} contains no variants and no segments")]
    Empty {
        /// Base URI of the playlist being parsed.
        base_uri: String,
    },

    /// An entry's URI could not be resolved against the base URI.
    #[error("cannot resolve URI '{uri}' against {base_uri}: {reason}")]
    UnresolvableUri {
        /// The URI as written in the playlist.
        uri: String,
        /// Base URI of the playlist being parsed.
        base_uri: String,
        /// Resolution failure detail.
        reason: String,
    },
}

impl ParseError {
    pub(crate) fn malformed(base_uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            base_uri: base_uri.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn empty(base_uri: impl Into<String>) -> Self {
        Self::Empty {
            base_uri: base_uri.into(),
        }
    }

    pub(crate) fn unresolvable(
        uri: impl Into<String>,
        base_uri: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnresolvableUri {
            uri: uri.into(),
            base_uri: base_uri.into(),
            reason: reason.into(),
        }
    }
}

/// Errors produced by variant selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectError {
    /// The master playlist lists no variants.
    #[error("master playlist {base_uri} lists no variants")]
    NoVariants {
        /// Base URI of the master playlist.
        base_uri: String,
    },
}
