//! Per-case access levels.
//!
//! A case access level is a bitmask stored on every grant and on every
//! effective-access row. Only three bits take part in resolution:
//!
//! | Bit | Meaning |
//! |-----|---------|
//! | [`DENY_ALL`](CaseAccessLevel::DENY_ALL) | no access, overrides every other bit |
//! | [`READ_ONLY`](CaseAccessLevel::READ_ONLY) | may read case data |
//! | [`FULL_ACCESS`](CaseAccessLevel::FULL_ACCESS) | may read and write case data |
//!
//! Unknown bits read back from storage are retained untouched.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AccessError;

bitflags! {
    /// Access level a subject holds on a single case.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CaseAccessLevel: u32 {
        /// Explicit revocation.
        const DENY_ALL    = 0x1;
        /// Read case data.
        const READ_ONLY   = 0x2;
        /// Read and write case data.
        const FULL_ACCESS = 0x4;
    }
}

impl CaseAccessLevel {
    /// Any level that lets the holder read.
    pub const ANY_READ: Self = Self::READ_ONLY.union(Self::FULL_ACCESS);

    /// Decode a mask read from storage, keeping bits this crate doesn't know.
    #[must_use]
    pub fn from_stored(bits: u32) -> Self {
        Self::from_bits_retain(bits)
    }

    /// Parse a level name (case-insensitive).
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "deny_all" | "deny" => Some(Self::DENY_ALL),
            "read_only" | "read" => Some(Self::READ_ONLY),
            "full_access" | "full" => Some(Self::FULL_ACCESS),
            _ => None,
        }
    }

    /// Combine a list of level names into one mask.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, AccessError> {
        names.iter().try_fold(Self::empty(), |acc, name| {
            Self::parse(name.as_ref())
                .map(|level| acc | level)
                .ok_or_else(|| AccessError::UnknownAccessLevel(name.as_ref().to_string()))
        })
    }

    /// Names of the known bits set in this mask.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.contains(Self::DENY_ALL) {
            names.push("deny_all");
        }
        if self.contains(Self::READ_ONLY) {
            names.push("read_only");
        }
        if self.contains(Self::FULL_ACCESS) {
            names.push("full_access");
        }
        names
    }

    /// Whether the deny bit is set.
    #[must_use]
    pub fn is_denied(self) -> bool {
        self.contains(Self::DENY_ALL)
    }

    /// Deny-all normalisation: a denied mask collapses to exactly `DENY_ALL`.
    #[must_use]
    pub fn effective(self) -> Self {
        if self.is_denied() {
            Self::DENY_ALL
        } else {
            self
        }
    }

    /// Whether the holder may read the case.
    #[must_use]
    pub fn allows_read(self) -> bool {
        !self.is_denied() && self.intersects(Self::ANY_READ)
    }

    /// Whether the holder may write the case.
    #[must_use]
    pub fn allows_write(self) -> bool {
        !self.is_denied() && self.contains(Self::FULL_ACCESS)
    }
}

impl fmt::Display for CaseAccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

// Encoded as the raw integer at the storage boundary.
impl Serialize for CaseAccessLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for CaseAccessLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_stored)
    }
}
