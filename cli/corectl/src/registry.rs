//! The fixed, ordered set of cluster nodes.
//!
//! Every verb walks the registry in declaration order. A node's name is also
//! its libvirt domain name and the stem of its disk and configuration
//! volumes, so names are restricted to characters that are safe in all
//! three places.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Maximum node name length (hostname label limit).
const MAX_NAME_LEN: usize = 63;

/// Errors from registry construction.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("node registry cannot be empty")]
    Empty,

    #[error("invalid node name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("duplicate node name '{0}'")]
    Duplicate(String),
}

/// A validated node name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeName(String);

impl NodeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the node's libvirt domain.
    pub fn domain(&self) -> &str {
        &self.0
    }

    /// Volume name of the node's copy-on-write disk.
    pub fn disk_volume(&self) -> String {
        format!("{}.qcow2", self.0)
    }

    /// Volume name of the node's first-boot configuration.
    pub fn config_volume(&self) -> String {
        corecluster_ignition::config_file_name(&self.0)
    }
}

impl FromStr for NodeName {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| RegistryError::InvalidName {
            name: s.to_string(),
            reason,
        };

        if s.is_empty() {
            return Err(invalid("name is empty"));
        }
        if s.len() > MAX_NAME_LEN {
            return Err(invalid("name is longer than 63 characters"));
        }
        if s.starts_with('-') {
            return Err(invalid("name cannot start with '-'"));
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(invalid("only lowercase letters, digits and '-' are allowed"));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Immutable, ordered node registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRegistry {
    nodes: Vec<NodeName>,
}

impl NodeRegistry {
    /// Build a registry, preserving the given order.
    pub fn new<I, S>(names: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut nodes: Vec<NodeName> = Vec::new();
        for name in names {
            let node: NodeName = name.as_ref().parse()?;
            if nodes.contains(&node) {
                return Err(RegistryError::Duplicate(node.0));
            }
            nodes.push(node);
        }

        if nodes.is_empty() {
            return Err(RegistryError::Empty);
        }
        Ok(Self { nodes })
    }

    /// Registry from compiled-in names, validated by the test suite.
    pub(crate) fn from_static(names: &[&'static str]) -> Self {
        Self {
            nodes: names.iter().map(|n| NodeName((*n).to_string())).collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeName> {
        self.nodes.iter()
    }

    pub fn get(&self, name: &str) -> Option<&NodeName> {
        self.nodes.iter().find(|n| n.as_str() == name)
    }
}

impl<'a> IntoIterator for &'a NodeRegistry {
    type Item = &'a NodeName;
    type IntoIter = std::slice::Iter<'a, NodeName>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
