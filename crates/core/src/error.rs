//! Error taxonomy shared by every authchain crate.
//!
//! Each crate keeps its own `thiserror` enum; `kind()` on those enums maps a
//! concrete failure onto one of these coarse categories so callers can react
//! without matching every variant.

use std::fmt;

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown validator, proposal, participant, block or record.
    NotFound,
    /// Malformed input, duplicate validator identity, expired proposal.
    InvalidArgument,
    /// Authorization or capability check failed.
    PermissionDenied,
    /// Duplicate create (transaction ID already used, proposal already live).
    AlreadyExists,
    /// Serialization or storage failure.
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::Io => "i/o error",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_display() {
        assert_eq!(ErrorKind::NotFound.to_string(), "not found");
        assert_eq!(ErrorKind::PermissionDenied.to_string(), "permission denied");
    }
}
