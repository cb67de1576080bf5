//! Stable pseudonyms for the shared channel.
//!
//! Presentation-only obfuscation: the mapping is deterministic and collisions
//! are expected. It is not a privacy guarantee against anyone who can guess
//! candidate names.

const PSEUDONYM_PREFIX: &str = "User#";
const HASH_MULTIPLIER: i32 = 31;
const PSEUDONYM_RANGE: i32 = 9000;
const PSEUDONYM_OFFSET: i32 = 1000;

/// Sender label used when the backend omits the sender entirely.
pub const UNKNOWN_SENDER: &str = "anon";

pub fn anonymize(raw_identity: &str) -> String {
    let hash = raw_identity
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_mul(HASH_MULTIPLIER)
                .wrapping_add(i32::from(unit))
        });
    let number = (hash % PSEUDONYM_RANGE).abs() + PSEUDONYM_OFFSET;
    format!("{PSEUDONYM_PREFIX}{number}")
}
