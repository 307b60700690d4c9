//! Application-wide permissions.
//!
//! Unlike case access, permissions are purely additive: a user's effective
//! permission mask is the union of the masks of every group the user is a
//! member of. No group can take a permission away from another.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AccessError;

bitflags! {
    /// Named, independent application capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Permission: u32 {
        const STANDARD             = 0x1;
        const SERVER_ADMINISTRATOR = 0x2;
        const ALERTS_READ          = 0x4;
        const ALERTS_WRITE         = 0x8;
        const ALERTS_DELETE        = 0x10;
        const SEARCH_ACROSS_CASES  = 0x20;
        const CUSTOMERS_READ       = 0x40;
        const CUSTOMERS_WRITE      = 0x80;
        const CASE_TEMPLATES_READ  = 0x100;
        const CASE_TEMPLATES_WRITE = 0x200;
        const ACTIVITIES_READ      = 0x400;
        const ALL_ACTIVITIES_READ  = 0x800;
    }
}

const PERMISSION_NAMES: &[(Permission, &str)] = &[
    (Permission::STANDARD, "standard"),
    (Permission::SERVER_ADMINISTRATOR, "server_administrator"),
    (Permission::ALERTS_READ, "alerts_read"),
    (Permission::ALERTS_WRITE, "alerts_write"),
    (Permission::ALERTS_DELETE, "alerts_delete"),
    (Permission::SEARCH_ACROSS_CASES, "search_across_cases"),
    (Permission::CUSTOMERS_READ, "customers_read"),
    (Permission::CUSTOMERS_WRITE, "customers_write"),
    (Permission::CASE_TEMPLATES_READ, "case_templates_read"),
    (Permission::CASE_TEMPLATES_WRITE, "case_templates_write"),
    (Permission::ACTIVITIES_READ, "activities_read"),
    (Permission::ALL_ACTIVITIES_READ, "all_activities_read"),
];

impl Permission {
    /// Mask of the default "Administrators" group.
    pub const ADMINISTRATORS: Self = Self::all();

    /// Mask of the default "Analysts" group.
    pub const ANALYSTS: Self = Self::STANDARD
        .union(Self::ALERTS_READ)
        .union(Self::ALERTS_WRITE)
        .union(Self::SEARCH_ACROSS_CASES)
        .union(Self::CUSTOMERS_READ)
        .union(Self::CASE_TEMPLATES_READ)
        .union(Self::ACTIVITIES_READ);

    /// Parse a single permission name (case-insensitive). `"all"` selects every bit.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim().to_lowercase();
        if name == "all" {
            return Some(Self::all());
        }
        PERMISSION_NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(p, _)| *p)
    }

    /// Combine a list of permission names into one mask.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, AccessError> {
        names.iter().try_fold(Self::empty(), |acc, name| {
            Self::parse(name.as_ref())
                .map(|p| acc | p)
                .ok_or_else(|| AccessError::UnknownPermission(name.as_ref().to_string()))
        })
    }

    /// Names of the bits set in this mask.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        PERMISSION_NAMES
            .iter()
            .filter(|(p, _)| self.contains(*p))
            .map(|(_, n)| *n)
            .collect()
    }

    /// Effective permission mask for a set of group masks.
    pub fn effective<I>(group_masks: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        group_masks
            .into_iter()
            .fold(Self::empty(), |acc, mask| acc | mask)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names().join("|"))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}
