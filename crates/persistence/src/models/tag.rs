use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Document;
use crate::core::Collection;
use crate::tenant::TenantId;

/// A label attached to devices and public keys.
///
/// Referencing documents hold the tag's name, so renaming or deleting a tag
/// rewrites every reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    #[serde(default)]
    pub id: String,
    /// Unique per tenant.
    pub name: String,
    pub tenant_id: TenantId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl Tag {
    /// Creates a tag.
    pub fn new(tenant_id: TenantId, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            tenant_id,
            created_at: now,
            updated_at: now,
        }
    }
}

impl Document for Tag {
    const COLLECTION: Collection = Collection::Tags;
}

/// A document kind that can reference tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagTarget {
    Device,
    PublicKey,
}

impl TagTarget {
    /// Every target kind.
    pub const ALL: [TagTarget; 2] = [TagTarget::Device, TagTarget::PublicKey];

    /// Collection holding targets of this kind.
    pub fn collection(&self) -> Collection {
        match self {
            TagTarget::Device => Collection::Devices,
            TagTarget::PublicKey => Collection::PublicKeys,
        }
    }

    /// Path of the tag-name array in a target document.
    pub fn tags_path(&self) -> &'static str {
        match self {
            TagTarget::Device => "tags",
            TagTarget::PublicKey => "filter.tags",
        }
    }
}

impl fmt::Display for TagTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection().entity())
    }
}
