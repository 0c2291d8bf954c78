//! Shared base image management.
//!
//! This module handles:
//! - Downloading the compressed release image and its detached signature
//! - Verifying the signature before anything is decompressed
//! - Decompressing into the shared image directory
//! - Short-circuiting when the raw image is already present
//!
//! A raw image, once present, is trusted as-is: it is not re-verified on
//! later runs.

mod decompress;
mod store;
mod verify;

pub use decompress::Compression;
pub use store::{BaseImage, ImageMeta, ImageState, ImageStore, VerificationStatus};
pub use verify::{GpgVerifier, SignatureVerifier};
