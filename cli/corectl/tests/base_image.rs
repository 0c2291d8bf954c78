//! Integration tests for base image acquisition.
//!
//! A local wiremock server stands in for the release server; signature
//! verification is stubbed so no keyring is needed.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use corecluster::config::ClusterConfig;
use corecluster::error::ClusterError;
use corecluster::image::{
    BaseImage, ImageMeta, ImageState, ImageStore, SignatureVerifier, VerificationStatus,
};
use flate2::write::GzEncoder;
use flate2::Compression as GzLevel;
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ARTIFACT: &str = "image.img.gz";
const RAW: &[u8] = b"raw disk image contents";

#[derive(Default)]
struct Accept {
    calls: AtomicUsize,
}

#[async_trait]
impl SignatureVerifier for Accept {
    async fn verify(&self, artifact: &Path, signature: &Path) -> Result<(), ClusterError> {
        assert!(artifact.is_file());
        assert!(signature.is_file());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Reject;

#[async_trait]
impl SignatureVerifier for Reject {
    async fn verify(&self, artifact: &Path, _signature: &Path) -> Result<(), ClusterError> {
        Err(ClusterError::Verification {
            artifact: artifact.to_path_buf(),
            reason: "BAD signature".to_string(),
        })
    }
}

fn gzipped(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn stable() -> BaseImage {
    BaseImage {
        channel: "stable".to_string(),
        version: "current".to_string(),
    }
}

fn store(server: &MockServer, dir: &Path, verifier: Arc<dyn SignatureVerifier>) -> ImageStore {
    let config = ClusterConfig {
        release_url: format!("{}/{{channel}}/{{version}}", server.uri()),
        artifact: ARTIFACT.to_string(),
        image_dir: dir.to_path_buf(),
        ..Default::default()
    };
    ImageStore::new(&config, verifier).unwrap()
}

async fn publish(server: &MockServer, artifact: &[u8], signature: Option<&[u8]>) {
    Mock::given(method("GET"))
        .and(path("/stable/current/image.img.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact.to_vec()))
        .expect(1)
        .mount(server)
        .await;

    let sig = match signature {
        Some(sig) => ResponseTemplate::new(200).set_body_bytes(sig.to_vec()),
        None => ResponseTemplate::new(404),
    };
    Mock::given(method("GET"))
        .and(path("/stable/current/image.img.gz.sig"))
        .respond_with(sig)
        .mount(server)
        .await;
}

fn leftovers(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".gz") || n.ends_with(".part"))
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_verified_image_is_unpacked_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    let compressed = gzipped(RAW);
    publish(&server, &compressed, Some(b"signature")).await;

    let verifier = Arc::new(Accept::default());
    let store = store(&server, dir.path(), verifier.clone());

    let raw = store.ensure_ready("stable", "current").await.unwrap();
    assert_eq!(std::fs::read(&raw).unwrap(), RAW);
    assert_eq!(store.state(&stable()), ImageState::Ready(raw.clone()));
    assert!(leftovers(dir.path()).is_empty());

    let meta: ImageMeta = serde_json::from_slice(
        &std::fs::read(dir.path().join("image-stable-current.img.meta.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta.verification, VerificationStatus::Verified);
    assert_eq!(meta.artifact_sha256, hex::encode(Sha256::digest(&compressed)));

    // Second run: no download (the artifact mock expects exactly one hit).
    let again = store.ensure_ready("stable", "current").await.unwrap();
    assert_eq!(again, raw);
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejected_signature_never_unpacks() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    publish(&server, &gzipped(RAW), Some(b"forged")).await;

    let store = store(&server, dir.path(), Arc::new(Reject));
    let err = store.ensure_ready("stable", "current").await.unwrap_err();

    assert!(matches!(err, ClusterError::Verification { .. }));
    assert_eq!(store.state(&stable()), ImageState::Missing);
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_missing_signature_is_verification_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    publish(&server, &gzipped(RAW), None).await;

    let verifier = Arc::new(Accept::default());
    let store = store(&server, dir.path(), verifier.clone());
    let err = store.ensure_ready("stable", "current").await.unwrap_err();

    assert!(matches!(err, ClusterError::Verification { .. }));
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.state(&stable()), ImageState::Missing);
}

#[tokio::test]
async fn test_missing_artifact_is_acquisition_failure() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let store = store(&server, dir.path(), Arc::new(Accept::default()));
    let err = store.ensure_ready("stable", "current").await.unwrap_err();

    assert!(matches!(err, ClusterError::Acquisition { .. }));
    assert!(leftovers(dir.path()).is_empty());
}

#[tokio::test]
async fn test_corrupt_artifact_leaves_no_raw_image() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();
    publish(&server, b"not gzip at all", Some(b"signature")).await;

    let store = store(&server, dir.path(), Arc::new(Accept::default()));
    assert!(store.ensure_ready("stable", "current").await.is_err());
    assert!(!store.raw_path(&stable()).exists());
    assert!(!dir.path().join("image-stable-current.img.part").exists());
}
