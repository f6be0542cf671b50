use serde::{Deserialize, Serialize};

use super::Document;
use crate::core::Collection;

/// Installation-wide settings, stored as a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    /// Whether first-run setup has completed.
    #[serde(default)]
    pub setup: bool,
    #[serde(default)]
    pub authentication: SystemAuthentication,
}

impl Document for System {
    const COLLECTION: Collection = Collection::System;
}

/// Enabled authentication methods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemAuthentication {
    #[serde(default = "enabled")]
    pub local: bool,
    #[serde(default)]
    pub saml: bool,
}

fn enabled() -> bool {
    true
}

impl Default for SystemAuthentication {
    fn default() -> Self {
        Self {
            local: enabled(),
            saml: false,
        }
    }
}
