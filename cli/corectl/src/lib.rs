//! corecluster - lifecycle orchestration for a small, fixed cluster of
//! libvirt VMs.
//!
//! ## Architecture
//!
//! - **Image store**: downloads, verifies and unpacks the shared base image
//! - **Disk provisioner**: layers one copy-on-write disk per node on it
//! - **Userdata**: first-boot configuration, synthesized as the operator
//! - **Control plane**: domain definition and power commands (libvirt)
//! - **Orchestrator**: maps verbs onto the above, node by node
//!
//! The binary (`corectl`) checks privilege, wires the production
//! collaborators and prints the per-node report.

pub mod commands;
pub mod config;
pub mod control_plane;
pub mod disk;
pub mod error;
pub mod image;
pub mod orchestrator;
pub mod output;
pub mod privilege;
pub mod registry;
pub mod report;
pub mod userdata;

pub use error::ClusterError;
