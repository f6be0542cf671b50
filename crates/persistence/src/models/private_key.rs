use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Document;
use crate::core::Collection;

/// Server-side key material, looked up by fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateKey {
    pub fingerprint: String,
    /// Encoded key material.
    pub data: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Document for PrivateKey {
    const COLLECTION: Collection = Collection::PrivateKeys;
}
