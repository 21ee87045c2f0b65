//! Deterministic key derivation.
//!
//! Every logical identity value maps to one store key. Each category owns a
//! distinct two-character prefix, so keys of different categories never
//! collide and every category can be range-scanned with
//! `prefix <= key < upper_bound`.

use sha2::{Digest, Sha256};
use std::fmt::Write;

/// Longest key, in characters, the backing store accepts.
pub const MAX_KEY_LENGTH: usize = 1024;

/// Version stamped on rows written with the current derivation scheme.
pub const KEY_VERSION: f64 = 4.0;

/// Marker separating a hashed user key from an escaped one. Escaped ids
/// never contain it, since `~` is itself escaped.
const HASHED_ID_MARKER: char = '~';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCategory {
    UserId,
    UserName,
    Email,
    Claim,
    Login,
    LoginProvider,
    Token,
    Role,
}

impl KeyCategory {
    pub const ALL: [KeyCategory; 8] = [
        Self::UserId,
        Self::UserName,
        Self::Email,
        Self::Claim,
        Self::Login,
        Self::LoginProvider,
        Self::Token,
        Self::Role,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Self::UserId => "U_",
            Self::UserName => "N_",
            Self::Email => "E_",
            Self::Claim => "C_",
            Self::Login => "L_",
            Self::LoginProvider => "P_",
            Self::Token => "T_",
            Self::Role => "R_",
        }
    }

    /// Exclusive upper bound of the category's key range.
    pub fn upper_bound(self) -> String {
        let prefix = self.prefix();
        let mut chars: Vec<char> = prefix.chars().collect();
        if let Some(last) = chars.last_mut() {
            *last = char::from_u32(*last as u32 + 1).unwrap_or(char::MAX);
        }
        chars.into_iter().collect()
    }

    /// True when `key` was derived for this category.
    pub fn owns(self, key: &str) -> bool {
        key.starts_with(self.prefix())
    }
}

/// Derives store keys for identity values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyHelper {
    key_version: f64,
}

impl Default for KeyHelper {
    fn default() -> Self {
        Self {
            key_version: KEY_VERSION,
        }
    }
}

impl KeyHelper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_version(&self) -> f64 {
        self.key_version
    }

    /// Partition key of a user; also the row key of the profile row.
    ///
    /// Ids are kept readable where possible; ids too long for the store
    /// fall back to a digest.
    pub fn user_id(&self, id: &str) -> String {
        let prefix = KeyCategory::UserId.prefix();
        let escaped = escape_key(id);
        if prefix.len() + escaped.chars().count() <= MAX_KEY_LENGTH {
            format!("{}{}", prefix, escaped)
        } else {
            format!("{}{}{}", prefix, HASHED_ID_MARKER, digest(&[id]))
        }
    }

    pub fn user_name(&self, user_name: &str) -> String {
        hashed(KeyCategory::UserName, &[&user_name.to_uppercase()])
    }

    pub fn email(&self, email: &str) -> String {
        hashed(KeyCategory::Email, &[&email.to_uppercase()])
    }

    pub fn claim(&self, claim_type: &str, claim_value: &str) -> String {
        hashed(KeyCategory::Claim, &[claim_type, claim_value])
    }

    pub fn login(&self, login_provider: &str, provider_key: &str) -> String {
        hashed(KeyCategory::Login, &[login_provider, provider_key])
    }

    /// Partition of the login index; all keys of one provider share it.
    pub fn login_provider(&self, login_provider: &str) -> String {
        hashed(KeyCategory::LoginProvider, &[login_provider])
    }

    pub fn token(&self, login_provider: &str, name: &str) -> String {
        hashed(KeyCategory::Token, &[login_provider, name])
    }

    pub fn role(&self, role_name: &str) -> String {
        hashed(KeyCategory::Role, &[&role_name.to_uppercase()])
    }
}

fn hashed(category: KeyCategory, parts: &[&str]) -> String {
    format!("{}{}", category.prefix(), digest(parts))
}

/// SHA-256 over length-prefixed parts, hex encoded.
///
/// Length prefixes keep `("ab", "c")` and `("a", "bc")` apart.
fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn needs_escape(c: char) -> bool {
    matches!(c, '/' | '\\' | '#' | '?' | '%' | HASHED_ID_MARKER) || c.is_control()
}

/// Percent-escapes characters the store rejects in keys.
fn escape_key(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    let mut buf = [0u8; 4];
    for c in raw.chars() {
        if needs_escape(c) {
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                let _ = write!(escaped, "%{:02X}", byte);
            }
        } else {
            escaped.push(c);
        }
    }
    escaped
}
