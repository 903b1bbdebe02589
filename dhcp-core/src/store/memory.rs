//! In-process [`LeaseStore`] fake, the test double every other
//! component's unit tests drive the core against instead of a live
//! cluster.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use dhcp_types::{BootScript, BootScriptSpec, Lease, LeaseSpec, LeaseStatus, Pool};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use super::{GatewayError, LeaseStore};

/// In-memory Store Gateway. `Pool` objects are read-mostly so they are
/// seeded once at construction; `Lease`/`BootScript` objects are mutated
/// through the trait the same way a real cluster would be.
#[derive(Debug, Default)]
pub struct MemoryGateway {
    pools: Mutex<Vec<Pool>>,
    leases: Mutex<BTreeMap<String, Lease>>,
    boot_scripts: Mutex<BTreeMap<String, BootScript>>,
}

impl MemoryGateway {
    /// an empty gateway with no pools, leases or boot scripts
    pub fn new() -> Self {
        Self::default()
    }

    /// seed the gateway with a fixed set of pools, as an operator would
    /// have already applied them to the control plane
    pub fn with_pools(pools: Vec<Pool>) -> Self {
        Self {
            pools: Mutex::new(pools),
            ..Self::default()
        }
    }

    /// seed the gateway with a boot script available for PXE lookups
    pub fn with_boot_script(self, name: impl Into<String>, data: impl Into<String>) -> Self {
        let name = name.into();
        self.boot_scripts.lock().expect("lock poisoned").insert(
            name.clone(),
            BootScript {
                metadata: object_meta(&name),
                spec: BootScriptSpec { data: data.into() },
            },
        );
        self
    }
}

fn object_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        uid: Some(format!("memory-uid-{name}")),
        ..Default::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryGateway {
    async fn list_pools(&self) -> Result<Vec<Pool>, GatewayError> {
        Ok(self.pools.lock().expect("lock poisoned").clone())
    }

    async fn list_leases(&self) -> Result<Vec<Lease>, GatewayError> {
        Ok(self
            .leases
            .lock()
            .expect("lock poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn get_lease(&self, name: &str) -> Result<Option<Lease>, GatewayError> {
        Ok(self.leases.lock().expect("lock poisoned").get(name).cloned())
    }

    async fn create_lease(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError> {
        let mut guard = self.leases.lock().expect("lock poisoned");
        if guard.contains_key(name) {
            return Err(GatewayError::Conflict(name.to_string()));
        }
        let lease = Lease {
            metadata: object_meta(name),
            spec,
            status: None,
        };
        guard.insert(name.to_string(), lease.clone());
        Ok(lease)
    }

    async fn patch_lease_spec(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError> {
        let mut guard = self.leases.lock().expect("lock poisoned");
        let lease = guard
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))?;
        lease.spec = spec;
        Ok(lease.clone())
    }

    async fn update_lease_status(
        &self,
        name: &str,
        status: LeaseStatus,
    ) -> Result<Lease, GatewayError> {
        let mut guard = self.leases.lock().expect("lock poisoned");
        let lease = guard
            .get_mut(name)
            .ok_or_else(|| GatewayError::NotFound(name.to_string()))?;
        lease.status = Some(status);
        Ok(lease.clone())
    }

    async fn delete_lease(&self, name: &str) -> Result<(), GatewayError> {
        self.leases.lock().expect("lock poisoned").remove(name);
        Ok(())
    }

    async fn get_boot_script(&self, name: &str) -> Result<Option<BootScript>, GatewayError> {
        Ok(self
            .boot_scripts
            .lock()
            .expect("lock poisoned")
            .get(name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(ip: &str, mac: &str) -> LeaseSpec {
        LeaseSpec {
            ip: ip.to_string(),
            mac: mac.to_string(),
            pool: "a".to_string(),
            is_static: false,
        }
    }

    #[tokio::test]
    async fn create_then_find_by_mac_round_trips() {
        let gw = MemoryGateway::new();
        gw.create_lease("192.168.10.100", spec("192.168.10.100", "aa:bb:cc:dd:ee:01"))
            .await
            .expect("create");

        let found = gw
            .find_lease_by_mac("aa:bb:cc:dd:ee:01")
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(found.spec.ip, "192.168.10.100");
    }

    #[tokio::test]
    async fn create_duplicate_name_conflicts() {
        let gw = MemoryGateway::new();
        gw.create_lease("192.168.10.100", spec("192.168.10.100", "aa:bb:cc:dd:ee:01"))
            .await
            .expect("create");
        let err = gw
            .create_lease("192.168.10.100", spec("192.168.10.100", "aa:bb:cc:dd:ee:02"))
            .await
            .expect_err("duplicate name must conflict");
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let gw = MemoryGateway::new();
        gw.create_lease("192.168.10.100", spec("192.168.10.100", "aa:bb:cc:dd:ee:01"))
            .await
            .expect("create");
        gw.delete_lease("192.168.10.100").await.expect("delete");
        assert!(gw
            .get_lease("192.168.10.100")
            .await
            .expect("get")
            .is_none());
    }
}
