//! Username rules: `^[a-z0-9_-]{2,}$`.

use thiserror::Error;

/// Minimum accepted username length.
pub const MIN_USERNAME_LEN: usize = 2;

/// Why a requested username was refused.
///
/// The `Display` text is sent verbatim to the client in an
/// `INVALID_USERNAME` reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsernameError {
    #[error("Username can't be empty")]
    Empty,

    #[error("Username must be at least {} characters", MIN_USERNAME_LEN)]
    TooShort,

    #[error("Username can only contain lowercase letters, digits, hyphens and underscores")]
    InvalidCharacters,

    #[error("Username is already taken")]
    Taken,
}

/// Check the syntactic rules, in order: non-empty, length, charset.
///
/// Uniqueness is not checked here; that is decided by the server registry
/// at insertion time.
pub fn validate_username(username: &str) -> Result<(), UsernameError> {
    if username.is_empty() {
        return Err(UsernameError::Empty);
    }
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(UsernameError::TooShort);
    }
    if !username.chars().all(is_username_char) {
        return Err(UsernameError::InvalidCharacters);
    }
    Ok(())
}

fn is_username_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}
