//! Ignition document model.
//!
//! Only the subset the cluster needs is modelled: the spec version and a
//! single account with its authorized keys.

use serde::{Deserialize, Serialize};

/// Ignition spec version understood by the guest's first-boot agent.
pub const IGNITION_VERSION: &str = "2.0.0";

/// Account that receives the authorized keys.
pub const DEFAULT_ACCOUNT: &str = "core";

/// A first-boot configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstBootConfig {
    pub ignition: IgnitionSection,
    pub passwd: Passwd,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnitionSection {
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passwd {
    pub users: Vec<User>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,

    #[serde(rename = "sshAuthorizedKeys")]
    pub ssh_authorized_keys: Vec<String>,
}

impl FirstBootConfig {
    /// Build a document authorizing `keys` for the default account.
    ///
    /// An empty key list is valid and yields `"sshAuthorizedKeys": []`.
    pub fn with_authorized_keys(keys: Vec<String>) -> Self {
        Self {
            ignition: IgnitionSection {
                version: IGNITION_VERSION.to_string(),
            },
            passwd: Passwd {
                users: vec![User {
                    name: DEFAULT_ACCOUNT.to_string(),
                    ssh_authorized_keys: keys,
                }],
            },
        }
    }

    /// Keys authorized for the default account, in discovery order.
    pub fn authorized_keys(&self) -> &[String] {
        self.passwd
            .users
            .iter()
            .find(|u| u.name == DEFAULT_ACCOUNT)
            .map(|u| u.ssh_authorized_keys.as_slice())
            .unwrap_or(&[])
    }

    /// Compact JSON, as written to disk.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
