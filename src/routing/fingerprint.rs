//! Fingerprint
//!
//! Deterministic identity for a `(group, key)` pair.

use std::fmt;

use crate::error::{Result, SpillError};

/// Seed of the 64-bit polynomial accumulator
const HASH_SEED: i64 = 1_125_899_906_842_597;

/// Polynomial base
const HASH_BASE: i64 = 31;

/// Separator placed between group and key before hashing
const SEPARATOR: &str = " | ";

/// Numeric identity of a cache entry, rendered as a decimal string
///
/// Used as the row primary key, the exclusion set key and the routing input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(i64);

impl Identity {
    /// Wrap a raw identity value (e.g. read back from a row)
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Raw value stored in the `cache_id` column
    pub fn value(self) -> i64 {
        self.0
    }

    /// 32-bit hash of the decimal rendering, folded to a non-negative value
    ///
    /// `h = 31 * h + c` over the characters of the decimal string, wrapping
    /// at 32 bits, then the unsigned absolute value so every identity routes.
    pub fn routing_hash(self) -> u32 {
        self.0
            .to_string()
            .bytes()
            .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(i32::from(c)))
            .unsigned_abs()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A `(group, key)` pair together with its derived identity
///
/// An empty `key` is legal and denotes a group-level marker (see
/// [`Fingerprint::group`]). Equality compares identities only.
#[derive(Debug, Clone, Copy)]
pub struct Fingerprint<'a> {
    group: &'a str,
    key: &'a str,
    id: Identity,
}

impl<'a> Fingerprint<'a> {
    /// Fingerprint an entry
    pub fn new(group: &'a str, key: &'a str) -> Self {
        Self {
            group,
            key,
            id: derive(group, key),
        }
    }

    /// Group-level fingerprint (empty key), used by group-wide operations
    pub fn group(group: &'a str) -> Self {
        Self::new(group, "")
    }

    /// Fingerprint from possibly-absent parts
    ///
    /// Both parts are required; a missing one is an invariant violation.
    pub fn from_parts(group: Option<&'a str>, key: Option<&'a str>) -> Result<Self> {
        let group =
            group.ok_or_else(|| SpillError::InvalidIdentity("cache group is missing".to_string()))?;
        let key =
            key.ok_or_else(|| SpillError::InvalidIdentity("cache key is missing".to_string()))?;
        Ok(Self::new(group, key))
    }

    pub fn group_name(&self) -> &'a str {
        self.group
    }

    pub fn key(&self) -> &'a str {
        self.key
    }

    pub fn id(&self) -> Identity {
        self.id
    }
}

impl PartialEq for Fingerprint<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Fingerprint<'_> {}

impl fmt::Display for Fingerprint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.group, SEPARATOR, self.key)
    }
}

/// Base-31 polynomial over the UTF-16 units of `lower(group) | lower(key)`
fn derive(group: &str, key: &str) -> Identity {
    let group = group.to_lowercase();
    let key = key.to_lowercase();

    let hash = group
        .encode_utf16()
        .chain(SEPARATOR.encode_utf16())
        .chain(key.encode_utf16())
        .fold(HASH_SEED, |h, unit| {
            h.wrapping_mul(HASH_BASE).wrapping_add(i64::from(unit))
        });

    Identity(hash)
}
