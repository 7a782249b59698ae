//! bcrypt hashing for stored credentials.
//!
//! Both functions are CPU-bound; handlers call them through `web::block`.

pub use bcrypt::DEFAULT_COST;

/// bcrypt only reads this many bytes of input.
pub const MAX_PASSWORD_BYTES: usize = 72;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("password longer than {} bytes", MAX_PASSWORD_BYTES)]
    TooLong,

    #[error(transparent)]
    Bcrypt(#[from] bcrypt::BcryptError),
}

pub fn hash(password: &str, cost: u32) -> Result<String, PasswordError> {
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(PasswordError::TooLong);
    }
    Ok(bcrypt::hash(password, cost)?)
}

/// Malformed stored hashes verify as `false` rather than erroring, so a
/// corrupt row reads as a credential mismatch. Inputs bcrypt would truncate
/// never verify.
pub fn verify(password: &str, hash: &str) -> bool {
    password.len() <= MAX_PASSWORD_BYTES && bcrypt::verify(password, hash).unwrap_or(false)
}
