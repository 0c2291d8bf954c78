//! In-memory control plane.
//!
//! Tracks domain definitions and states the way libvirt does for the
//! commands the orchestrator issues, and records every mutating command in
//! order. State queries are not recorded.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{ControlPlane, DomainSpec, DomainState};
use crate::error::ClusterError;

/// A mutating command issued to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlCall {
    Define(String),
    Start(String),
    Reboot(String),
    Stop(String),
    Destroy(String),
    Undefine(String),
    RefreshPool(String),
    DeleteVolume { pool: String, volume: String },
}

impl ControlCall {
    fn describe(&self) -> String {
        match self {
            ControlCall::Define(d) => format!("define {d}"),
            ControlCall::Start(d) => format!("start {d}"),
            ControlCall::Reboot(d) => format!("reboot {d}"),
            ControlCall::Stop(d) => format!("shutdown {d}"),
            ControlCall::Destroy(d) => format!("destroy {d}"),
            ControlCall::Undefine(d) => format!("undefine {d}"),
            ControlCall::RefreshPool(p) => format!("pool-refresh {p}"),
            ControlCall::DeleteVolume { pool, volume } => {
                format!("vol-delete --pool {pool} {volume}")
            }
        }
    }
}

#[derive(Debug)]
struct FakeDomain {
    definition: String,
    state: DomainState,
}

impl FakeDomain {
    fn running(&self) -> bool {
        self.state == DomainState::Running
    }
}

fn power_state(running: bool) -> DomainState {
    if running {
        DomainState::Running
    } else {
        DomainState::Stopped
    }
}

#[derive(Debug, Default)]
struct Inner {
    domains: HashMap<String, FakeDomain>,
    calls: Vec<ControlCall>,
    failures: HashSet<ControlCall>,
}

/// In-memory control plane for tests.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    inner: Mutex<Inner>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `call` fail whenever it is issued.
    pub async fn fail_on(&self, call: ControlCall) {
        self.inner.lock().await.failures.insert(call);
    }

    /// Pre-populate a domain.
    pub async fn insert_domain(&self, domain: &str, definition: &str, running: bool) {
        self.inner.lock().await.domains.insert(
            domain.to_string(),
            FakeDomain {
                definition: definition.to_string(),
                state: power_state(running),
            },
        );
    }

    /// Force a defined domain into `state`, e.g. `Other("paused")`.
    pub async fn set_state(&self, domain: &str, state: DomainState) {
        if let Some(d) = self.inner.lock().await.domains.get_mut(domain) {
            d.state = state;
        }
    }

    /// Commands issued so far, in order.
    pub async fn calls(&self) -> Vec<ControlCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Current definition of `domain`.
    pub async fn definition(&self, domain: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .domains
            .get(domain)
            .map(|d| d.definition.clone())
    }

    /// Record `call`, failing if it was configured to.
    async fn issue<F>(&self, call: ControlCall, apply: F) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut HashMap<String, FakeDomain>) -> Result<(), String>,
    {
        let mut inner = self.inner.lock().await;
        debug!(call = %call.describe(), "[FAKE] Control plane command");
        inner.calls.push(call.clone());

        if inner.failures.contains(&call) {
            return Err(ClusterError::control_plane(call.describe(), "injected failure"));
        }
        apply(&mut inner.domains)
            .map_err(|message| ClusterError::control_plane(call.describe(), message))
    }
}

fn running_domain<'a>(
    domains: &'a mut HashMap<String, FakeDomain>,
    domain: &str,
) -> Result<&'a mut FakeDomain, String> {
    match domains.get_mut(domain) {
        Some(d) if d.running() => Ok(d),
        Some(_) => Err(format!("domain '{domain}' is not running")),
        None => Err(format!("failed to get domain '{domain}'")),
    }
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn domain_state(&self, domain: &str) -> Result<DomainState, ClusterError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .domains
            .get(domain)
            .map(|d| d.state.clone())
            .unwrap_or(DomainState::Undefined))
    }

    async fn default_definition(&self, spec: &DomainSpec) -> Result<String, ClusterError> {
        Ok(format!(
            r#"<domain type="qemu">
  <name>{name}</name>
  <memory unit="MiB">{memory}</memory>
  <vcpu>{vcpus}</vcpu>
  <devices>
    <disk type="file" device="disk">
      <source file="{disk}"/>
    </disk>
    <interface type="network">
      <source network="{network}"/>
    </interface>
  </devices>
</domain>
"#,
            name = spec.name,
            memory = spec.memory_mib,
            vcpus = spec.vcpus,
            disk = spec.disk.display(),
            network = spec.network
        ))
    }

    async fn define_domain(&self, domain: &str, definition: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Define(domain.to_string()), |domains| {
            let state = domains
                .get(domain)
                .map(|d| d.state.clone())
                .unwrap_or(DomainState::Stopped);
            domains.insert(
                domain.to_string(),
                FakeDomain {
                    definition: definition.to_string(),
                    state,
                },
            );
            Ok(())
        })
        .await
    }

    async fn start_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Start(domain.to_string()), |domains| {
            match domains.get_mut(domain) {
                Some(d) if d.state == DomainState::Stopped => {
                    d.state = DomainState::Running;
                    Ok(())
                }
                Some(_) => Err("domain is already active".to_string()),
                None => Err(format!("failed to get domain '{domain}'")),
            }
        })
        .await
    }

    async fn reboot_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Reboot(domain.to_string()), |domains| {
            running_domain(domains, domain).map(|_| ())
        })
        .await
    }

    async fn stop_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Stop(domain.to_string()), |domains| {
            running_domain(domains, domain).map(|d| d.state = DomainState::Stopped)
        })
        .await
    }

    async fn destroy_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Destroy(domain.to_string()), |domains| {
            running_domain(domains, domain).map(|d| d.state = DomainState::Stopped)
        })
        .await
    }

    async fn undefine_domain(&self, domain: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::Undefine(domain.to_string()), |domains| {
            domains
                .remove(domain)
                .map(|_| ())
                .ok_or_else(|| format!("failed to get domain '{domain}'"))
        })
        .await
    }

    async fn refresh_pool(&self, pool: &str) -> Result<(), ClusterError> {
        self.issue(ControlCall::RefreshPool(pool.to_string()), |_| Ok(()))
            .await
    }

    async fn delete_volume(&self, pool: &str, volume: &str) -> Result<(), ClusterError> {
        self.issue(
            ControlCall::DeleteVolume {
                pool: pool.to_string(),
                volume: volume.to_string(),
            },
            |_| Ok(()),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_domain_lifecycle() {
        let cp = FakeControlPlane::new();
        assert_eq!(cp.domain_state("core1").await.unwrap(), DomainState::Undefined);

        cp.define_domain("core1", "<domain/>").await.unwrap();
        assert_eq!(cp.domain_state("core1").await.unwrap(), DomainState::Stopped);

        cp.start_domain("core1").await.unwrap();
        assert_eq!(cp.domain_state("core1").await.unwrap(), DomainState::Running);
        assert!(cp.start_domain("core1").await.is_err());

        cp.destroy_domain("core1").await.unwrap();
        cp.undefine_domain("core1").await.unwrap();
        assert_eq!(cp.domain_state("core1").await.unwrap(), DomainState::Undefined);
    }

    #[tokio::test]
    async fn test_injected_failure_is_recorded() {
        let cp = FakeControlPlane::new();
        cp.insert_domain("core1", "<domain/>", true).await;
        cp.fail_on(ControlCall::Reboot("core1".to_string())).await;

        assert!(cp.reboot_domain("core1").await.is_err());
        assert_eq!(cp.calls().await, [ControlCall::Reboot("core1".to_string())]);
    }

    #[tokio::test]
    async fn test_start_rejects_transitional_domain() {
        let cp = FakeControlPlane::new();
        cp.insert_domain("core1", "<domain/>", true).await;
        cp.set_state("core1", DomainState::Other("paused".to_string()))
            .await;

        assert!(cp.start_domain("core1").await.is_err());
        assert_eq!(
            cp.domain_state("core1").await.unwrap(),
            DomainState::Other("paused".to_string())
        );
    }
}
