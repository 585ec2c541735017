//! Validated `owner/project` repository identifiers

use std::fmt;
use thiserror::Error;

/// Why a repository URL was rejected before any lookup or fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("Invalid GitHub URL, must have only one slash.")]
    MissingSlash,

    #[error("Invalid GitHub URL, invalid character(s) found.")]
    InvalidCharacter,
}

/// A repository named as `owner/project`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoIdentifier {
    full_name: String,
    slash: usize,
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-')
}

impl RepoIdentifier {
    /// Validate a raw `owner/project` string.
    ///
    /// The slash count is checked before the character set, so `a/b/c#`
    /// reports a slash problem rather than a bad character.
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        if raw.matches('/').count() != 1 {
            return Err(IdentifierError::MissingSlash);
        }
        if !raw.chars().all(is_allowed) {
            return Err(IdentifierError::InvalidCharacter);
        }

        let slash = raw.find('/').ok_or(IdentifierError::MissingSlash)?;
        Ok(Self {
            full_name: raw.to_string(),
            slash,
        })
    }

    pub fn owner(&self) -> &str {
        &self.full_name[..self.slash]
    }

    pub fn project(&self) -> &str {
        &self.full_name[self.slash + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.full_name
    }
}

impl fmt::Display for RepoIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name)
    }
}
