//! # dhcp-types
//!
//! Declarative data model for the DHCP control plane: the three
//! custom-resource kinds (`Pool`, `Lease`, `BootScript`) the server reads
//! and writes in API group [`GROUP`], version [`VERSION`].
#![warn(missing_debug_implementations, rust_2018_idioms, unreachable_pub)]

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group for all resources in this crate.
pub const GROUP: &str = "dhcp.xfix.org";
/// API version for all resources in this crate.
pub const VERSION: &str = "v1alpha1";

/// An operator-defined address range within a subnet.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dhcp.xfix.org",
    version = "v1alpha1",
    kind = "Pool",
    plural = "pools",
    namespaced
)]
pub struct PoolSpec {
    /// lower wins when more than one pool contains a given address
    pub priority: i32,
    /// CIDR, e.g. "192.168.10.0/24"
    pub subnet: String,
    /// inclusive lower bound of the assignable range, within `subnet`
    pub range_start: String,
    /// inclusive upper bound of the assignable range, within `subnet`
    pub range_end: String,
    /// single router address handed out as option 3
    pub routers: String,
    /// broadcast address handed out as option 28, if set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<String>,
    /// DNS servers handed out as option 6
    #[serde(default)]
    pub dns: Vec<String>,
    /// NTP servers handed out as option 42
    #[serde(default)]
    pub ntp: Vec<String>,
    /// domain name handed out as option 15, if set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// duration string, e.g. "1h"
    pub lease_duration: String,
    /// boot file name served via the BOOTP header, may be empty
    #[serde(default)]
    pub boot_filename: String,
    /// leases from this pool are marked static and never reaped
    #[serde(default)]
    pub permanent: bool,
}

/// A binding of one IPv4 address to one client MAC, server-owned.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dhcp.xfix.org",
    version = "v1alpha1",
    kind = "Lease",
    plural = "leases",
    namespaced,
    status = "LeaseStatus"
)]
pub struct LeaseSpec {
    /// dotted-quad IPv4 address; also used, verbatim, as the object name
    pub ip: String,
    /// canonical lowercase colon-separated MAC address
    pub mac: String,
    /// name of the owning Pool
    pub pool: String,
    /// mirrors the owning Pool's `permanent` flag; exempts this lease from reaping
    #[serde(rename = "static", default)]
    pub is_static: bool,
}

/// Mutable half of a Lease, updated via the status subresource.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LeaseStatus {
    /// client-supplied host name, if any
    #[serde(default)]
    pub hostname: String,
    /// unix seconds, as a string, when this binding was (re)created
    pub starts: String,
    /// unix seconds, as a string, when this binding expires
    pub ends: String,
}

/// An opaque network-boot script, read-only from the server's perspective.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "dhcp.xfix.org",
    version = "v1alpha1",
    kind = "BootScript",
    plural = "bootscripts",
    namespaced
)]
pub struct BootScriptSpec {
    /// raw script contents, served verbatim over HTTP
    pub data: String,
}

/// Build the owner reference attached to a Lease so it cascades-deletes
/// with its Pool.
pub fn pool_owner_reference(pool: &Pool) -> Option<OwnerReference> {
    let name = pool.metadata.name.clone()?;
    let uid = pool.metadata.uid.clone()?;
    Some(OwnerReference {
        api_version: format!("{GROUP}/{VERSION}"),
        kind: "Pool".to_string(),
        name,
        uid,
        block_owner_deletion: Some(true),
        controller: Some(true),
    })
}
