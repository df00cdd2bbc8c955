//! Stable identifiers for scraped events.
//!
//! A source-native id wins when one exists. Otherwise the id is a truncated SHA-256
//! digest over fields that do not change between scrapes of the same event.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::NormalizeError;

/// Hex characters kept from the digest.
pub const ID_HASH_LEN: usize = 12;

/// Which immutable fields a source hashes when it has no native id.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKey {
    #[default]
    NameStart,
    NameUrl,
    /// The detail URL alone when present, otherwise name and start.
    UrlOrNameStart,
}

pub fn native_id(prefix: &str, id: &str) -> String {
    format!("{prefix}_{}", id.trim())
}

pub fn hashed_id(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update(b"|");
        }
        hasher.update(part.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("{prefix}_{}", &digest[..ID_HASH_LEN])
}

fn start_key(start: &DateTime<FixedOffset>) -> String {
    start.with_timezone(&Utc).to_rfc3339()
}

/// Resolves the identity for one event of a source.
pub fn resolve(
    prefix: &str,
    native: Option<&str>,
    key: IdentityKey,
    name: &str,
    start: &DateTime<FixedOffset>,
    url: Option<&str>,
) -> Result<String, NormalizeError> {
    if let Some(id) = native.map(str::trim).filter(|id| !id.is_empty()) {
        return Ok(native_id(prefix, id));
    }

    let url = url.map(str::trim).filter(|u| !u.is_empty());
    match (key, url) {
        (IdentityKey::NameStart, _) => Ok(hashed_id(prefix, &[name, &start_key(start)])),
        (IdentityKey::NameUrl, Some(url)) => Ok(hashed_id(prefix, &[name, url])),
        (IdentityKey::NameUrl, None) => Err(NormalizeError::NoStableIdentity {
            name: name.to_string(),
        }),
        (IdentityKey::UrlOrNameStart, Some(url)) => Ok(hashed_id(prefix, &[url])),
        (IdentityKey::UrlOrNameStart, None) => {
            Ok(hashed_id(prefix, &[name, &start_key(start)]))
        }
    }
}
