use crate::DistroError;
use sha_crypt::{sha512_simple, Sha512Params};

/// Crypt formats accepted as already-hashed: SHA-512, SHA-256, bcrypt, MD5.
const CRYPT_PREFIXES: [&str; 4] = ["$6$", "$5$", "$2b$", "$1$"];

/// Whether a password string is already in crypt(3) format.
pub fn password_is_crypted(password: &str) -> bool {
    CRYPT_PREFIXES.iter().any(|p| password.starts_with(p))
}

/// Hash a plaintext password in SHA-512 crypt format (`$6$...`).
///
/// The 16-character salt is drawn from the system RNG on every call, so
/// hashing happens at compose time and the hash, never the plaintext,
/// enters the recipe.
pub fn crypt_sha512(password: &str) -> Result<String, DistroError> {
    let params = Sha512Params::new(5000).map_err(|e| DistroError::Crypt(format!("{e:?}")))?;
    sha512_simple(password, &params).map_err(|e| DistroError::Crypt(format!("{e:?}")))
}
