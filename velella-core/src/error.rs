//! Failure modes of the profile-HMM crates.
//!
//! Velella works purely in memory: profiles arrive as text and leave as
//! text, so everything that can go wrong is either malformed profile
//! text or an argument that violates a model contract. Both variants
//! carry a human-readable message; parse errors name the offending
//! 1-based line where one exists. Precondition violations (Viterbi on an
//! unretracted model, mismatched DP buffers) are programmer errors and
//! assert instead of returning.

use thiserror::Error;

/// What a Velella operation can fail with.
#[derive(Debug, Error)]
pub enum VelellaError {
    /// Malformed HMMER-3/f profile text or alignment row: an obsolete
    /// version tag, a non-DNA alphabet, a truncated position block, a
    /// missing `//` terminator, or an unparseable value token.
    #[error("parse error: {0}")]
    Parse(String),

    /// An argument outside the model's contracts: an empty or ragged
    /// MSA, a symfrac or profile length out of range, a non-DNA query
    /// base, or unordered known-path segments.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience alias used throughout the Velella crates.
pub type Result<T> = std::result::Result<T, VelellaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_keep_their_context() {
        let err = VelellaError::Parse("line 7: missing CONS annotation".into());
        assert_eq!(err.to_string(), "parse error: line 7: missing CONS annotation");
    }

    #[test]
    fn invalid_input_is_labelled() {
        let err = VelellaError::InvalidInput("symfrac 1.5 must be between 0 and 1".into());
        assert!(err.to_string().starts_with("invalid input: "));
    }
}
