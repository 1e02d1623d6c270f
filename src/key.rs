//! Identifier hashing.
//!
//! The lookup service addresses entries by string identifier. The index
//! itself only understands 64-bit keys, so an identifier is placed on the
//! ring by hashing it with md5 and reading the first 8 digest bytes as a
//! big-endian integer. The hash spreads identifiers uniformly around the
//! key space; nothing here relies on md5 being collision resistant, and a
//! colliding identifier simply upserts the existing entry.

use md5::{Digest, Md5};

use crate::Key;

/// Derives the ring position for a string identifier.
///
/// # Example
///
/// ```
/// use ringtree::key::ident_key;
///
/// // Same identifier, same position.
/// assert_eq!(ident_key("node-a"), ident_key("node-a"));
/// assert_ne!(ident_key("node-a"), ident_key("node-b"));
/// ```
#[must_use]
pub fn ident_key(ident: &str) -> Key {
    let digest = Md5::digest(ident.as_bytes());
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&digest[..8]);
    Key::from_be_bytes(raw)
}
