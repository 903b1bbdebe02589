//! The production [`LeaseStore`] implementation, backed by a real
//! cluster via `kube::Api`.

use async_trait::async_trait;
use dhcp_types::{BootScript, Lease, LeaseSpec, LeaseStatus, Pool, pool_owner_reference};
use kube::{
    Api, Client,
    api::{ListParams, Patch, PatchParams},
};
use serde_json::json;

use super::{GatewayError, LeaseStore};

/// field manager name used for all server-side-apply patches
const FIELD_MANAGER: &str = "dhcp-server";

/// Store Gateway backed by a live Kubernetes-shaped control plane.
#[derive(Debug, Clone)]
pub struct KubeGateway {
    pools: Api<Pool>,
    leases: Api<Lease>,
    boot_scripts: Api<BootScript>,
}

impl KubeGateway {
    /// Build a gateway from an already-constructed client. Callers
    /// obtain `client` via [`kube::Client::try_default`], which honors
    /// `KUBECONFIG` when set and falls back to in-cluster credentials.
    pub fn new(client: Client) -> Self {
        Self {
            pools: Api::default_namespaced(client.clone()),
            leases: Api::default_namespaced(client.clone()),
            boot_scripts: Api::default_namespaced(client),
        }
    }

    /// Convenience constructor matching the server's startup sequence:
    /// build a client the standard way and wrap it.
    pub async fn connect() -> Result<Self, GatewayError> {
        let client = Client::try_default()
            .await
            .map_err(|err| GatewayError::Transient(err.into()))?;
        Ok(Self::new(client))
    }
}

fn classify(name: &str, err: kube::Error) -> GatewayError {
    match &err {
        kube::Error::Api(resp) if resp.code == 404 => GatewayError::NotFound(name.to_string()),
        kube::Error::Api(resp) if resp.code == 409 => GatewayError::Conflict(name.to_string()),
        _ => GatewayError::Transient(err.into()),
    }
}

#[async_trait]
impl LeaseStore for KubeGateway {
    async fn list_pools(&self) -> Result<Vec<Pool>, GatewayError> {
        Ok(self
            .pools
            .list(&ListParams::default())
            .await
            .map_err(|err| classify("pools", err))?
            .items)
    }

    async fn list_leases(&self) -> Result<Vec<Lease>, GatewayError> {
        Ok(self
            .leases
            .list(&ListParams::default())
            .await
            .map_err(|err| classify("leases", err))?
            .items)
    }

    async fn get_lease(&self, name: &str) -> Result<Option<Lease>, GatewayError> {
        match self.leases.get(name).await {
            Ok(lease) => Ok(Some(lease)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(err) => Err(classify(name, err)),
        }
    }

    async fn create_lease(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError> {
        let pool = self
            .pools
            .get(&spec.pool)
            .await
            .map_err(|err| classify(&spec.pool, err))?;
        let mut lease = Lease::new(name, spec);
        lease.metadata.owner_references = pool_owner_reference(&pool).into_iter().collect();
        self.leases
            .create(&Default::default(), &lease)
            .await
            .map_err(|err| classify(name, err))
    }

    async fn patch_lease_spec(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError> {
        let patch = json!({ "spec": spec });
        self.leases
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .map_err(|err| classify(name, err))
    }

    async fn update_lease_status(
        &self,
        name: &str,
        status: LeaseStatus,
    ) -> Result<Lease, GatewayError> {
        let patch = json!({ "status": status });
        self.leases
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(patch),
            )
            .await
            .map_err(|err| classify(name, err))
    }

    async fn delete_lease(&self, name: &str) -> Result<(), GatewayError> {
        match self.leases.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(err) => Err(classify(name, err)),
        }
    }

    async fn get_boot_script(&self, name: &str) -> Result<Option<BootScript>, GatewayError> {
        match self.boot_scripts.get(name).await {
            Ok(script) => Ok(Some(script)),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
            Err(err) => Err(classify(name, err)),
        }
    }
}
