//! Service identities and references

use crate::PropertyBag;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, totally ordered identity of a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(pub u64);

impl ServiceId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for ServiceId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity plus attributes of a registration, as exposed in snapshots
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceReferenceDto {
    pub id: ServiceId,
    pub properties: PropertyBag,
}

impl ServiceReferenceDto {
    pub fn new(id: ServiceId, properties: PropertyBag) -> Self {
        Self { id, properties }
    }
}
