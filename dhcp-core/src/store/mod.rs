//! # Store Gateway
//!
//! Typed CRUD facade over the control plane's generic object API. The
//! rest of the core depends only on the [`LeaseStore`] trait, never on
//! a concrete backend.

use async_trait::async_trait;
use dhcp_types::{BootScript, Lease, LeaseSpec, LeaseStatus, Pool};
use thiserror::Error;

pub mod kube_gateway;
pub mod memory;

pub use kube_gateway::KubeGateway;
pub use memory::MemoryGateway;

/// Structured error kind surfaced by the Store Gateway (spec §7).
#[derive(Debug, Error)]
pub enum GatewayError {
    /// the named object does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// a concurrent writer won the race (resource-version conflict)
    #[error("conflict updating {0}")]
    Conflict(String),
    /// network or 5xx-shaped failure; caller should drop and let the client retry
    #[error("transient store error: {0}")]
    Transient(#[source] anyhow::Error),
    /// object could not be decoded/validated
    #[error("malformed object {0}: {1}")]
    Malformed(String, String),
}

/// Typed CRUD facade over Pool, Lease and BootScript objects.
///
/// Implementations must be safe to call concurrently; the Handler and
/// Janitor serialize their own access with a single process-wide lock,
/// the gateway itself stays stateless and reentrant.
#[async_trait]
pub trait LeaseStore: Send + Sync + 'static {
    /// list every Pool currently defined
    async fn list_pools(&self) -> Result<Vec<Pool>, GatewayError>;

    /// list every Lease currently present
    async fn list_leases(&self) -> Result<Vec<Lease>, GatewayError>;

    /// find the (at most one) active Lease for a client MAC
    async fn find_lease_by_mac(&self, mac: &str) -> Result<Option<Lease>, GatewayError> {
        Ok(self
            .list_leases()
            .await?
            .into_iter()
            .find(|lease| lease.spec.mac == mac))
    }

    /// fetch a Lease by name (the dotted-quad form of its IP)
    async fn get_lease(&self, name: &str) -> Result<Option<Lease>, GatewayError>;

    /// create a new Lease; the name must equal the dotted form of `spec.ip`
    async fn create_lease(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError>;

    /// merge-patch an existing Lease's Spec
    async fn patch_lease_spec(&self, name: &str, spec: LeaseSpec) -> Result<Lease, GatewayError>;

    /// update an existing Lease's Status subresource
    async fn update_lease_status(
        &self,
        name: &str,
        status: LeaseStatus,
    ) -> Result<Lease, GatewayError>;

    /// delete a Lease by name; not-found is not an error
    async fn delete_lease(&self, name: &str) -> Result<(), GatewayError>;

    /// fetch a BootScript by name
    async fn get_boot_script(&self, name: &str) -> Result<Option<BootScript>, GatewayError>;
}
