//! # Lease State Machine
//!
//! Creates, renews, marks static, and deletes `Lease` records; derives
//! expiry; enforces at-most-one lease per client MAC by keying the
//! Lease's name on its IP.

use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dhcp_types::{Lease, LeaseSpec, LeaseStatus};
use tracing::debug;

use crate::pool_index::Network;
use crate::store::{GatewayError, LeaseStore};

/// grace period added on top of a lease's `ends` before the Janitor
/// reaps it; see spec design notes §9
pub const EXPIRY_GRACE: Duration = Duration::from_secs(5 * 60);

/// State of a client's binding, derived from whether a matching Lease
/// exists and its fields (spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// no Lease with matching MAC
    Absent,
    /// Lease exists; `ends > now`
    Bound(Lease),
    /// Lease exists; `ends + grace <= now` and not static
    Expired(Lease),
    /// Lease exists and `spec.static == true`
    Static(Lease),
}

/// render a `SystemTime` as the unix-seconds string the Lease Status
/// fields are stored in
pub fn format_unix_seconds(t: SystemTime) -> String {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
        .to_string()
}

/// parse a unix-seconds string back into a `SystemTime`
pub fn parse_unix_seconds(raw: &str) -> Option<SystemTime> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
}

/// classify an existing (or absent) Lease for a MAC into its state
pub fn classify(lease: Option<Lease>, now: SystemTime) -> LeaseState {
    let Some(lease) = lease else {
        return LeaseState::Absent;
    };
    if lease.spec.is_static {
        return LeaseState::Static(lease);
    }
    let ends = lease
        .status
        .as_ref()
        .and_then(|status| parse_unix_seconds(&status.ends))
        .unwrap_or(UNIX_EPOCH);
    if ends + EXPIRY_GRACE <= now {
        LeaseState::Expired(lease)
    } else {
        LeaseState::Bound(lease)
    }
}

/// Create a brand-new Lease binding `ip` to `mac` in `network`,
/// following the DISCOVER/REQUEST new-bind path (spec §4.4 row 1).
pub async fn create_new<S: LeaseStore>(
    store: &S,
    network: &Network,
    ip: Ipv4Addr,
    mac: &str,
    hostname: Option<&str>,
    now: SystemTime,
) -> Result<Lease, GatewayError> {
    let name = ip.to_string();
    let spec = LeaseSpec {
        ip: name.clone(),
        mac: mac.to_string(),
        pool: network.name().to_string(),
        is_static: network.permanent(),
    };
    store.create_lease(&name, spec).await?;
    let status = LeaseStatus {
        hostname: hostname.unwrap_or_default().to_string(),
        starts: format_unix_seconds(now),
        ends: format_unix_seconds(now + network.lease_duration()),
    };
    debug!(ip = %ip, mac, pool = network.name(), "created new lease");
    store.update_lease_status(&name, status).await
}

/// Refresh an existing Lease's expiry (and `static` mirror, and
/// `hostname` if the packet supplied one), per spec §4.4 rows 2-4.
pub async fn refresh<S: LeaseStore>(
    store: &S,
    lease: &Lease,
    network: &Network,
    hostname: Option<&str>,
    now: SystemTime,
) -> Result<Lease, GatewayError> {
    let name = lease.spec.ip.clone();

    let mut spec = lease.spec.clone();
    if spec.is_static != network.permanent() {
        spec.is_static = network.permanent();
        store.patch_lease_spec(&name, spec).await?;
    }

    let preserved_hostname = lease
        .status
        .as_ref()
        .map(|status| status.hostname.clone())
        .unwrap_or_default();
    let status = LeaseStatus {
        hostname: hostname.map(str::to_string).unwrap_or(preserved_hostname),
        starts: lease
            .status
            .as_ref()
            .map(|status| status.starts.clone())
            .unwrap_or_else(|| format_unix_seconds(now)),
        ends: format_unix_seconds(now + network.lease_duration()),
    };
    debug!(ip = %name, mac = %lease.spec.mac, "refreshed lease");
    store.update_lease_status(&name, status).await
}

/// Delete the Lease bound to `mac`, if any (RELEASE, spec §4.4 row 5).
pub async fn release<S: LeaseStore>(store: &S, lease: &Lease) -> Result<(), GatewayError> {
    store.delete_lease(&lease.spec.ip).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGateway;
    use dhcp_types::{Pool, PoolSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn network(permanent: bool) -> Network {
        let pool = Pool {
            metadata: ObjectMeta {
                name: Some("a".to_string()),
                ..Default::default()
            },
            spec: PoolSpec {
                priority: 1,
                subnet: "192.168.10.0/24".to_string(),
                range_start: "192.168.10.100".to_string(),
                range_end: "192.168.10.110".to_string(),
                routers: "192.168.10.1".to_string(),
                broadcast: None,
                dns: vec![],
                ntp: vec![],
                domain: None,
                lease_duration: "1h".to_string(),
                boot_filename: String::new(),
                permanent,
            },
        };
        Network::try_from(pool).expect("valid pool")
    }

    #[tokio::test]
    async fn create_new_then_classify_bound() {
        let store = MemoryGateway::new();
        let net = network(false);
        let now = SystemTime::now();
        let ip = Ipv4Addr::new(192, 168, 10, 100);

        let lease = create_new(&store, &net, ip, "aa:bb:cc:dd:ee:01", None, now)
            .await
            .expect("create");
        assert_eq!(lease.spec.ip, "192.168.10.100");

        let found = store
            .find_lease_by_mac("aa:bb:cc:dd:ee:01")
            .await
            .expect("lookup")
            .expect("present");
        match classify(Some(found), now) {
            LeaseState::Bound(_) => {}
            other => panic!("expected Bound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_extends_ends_and_preserves_hostname() {
        let store = MemoryGateway::new();
        let net = network(false);
        let now = SystemTime::now();
        let ip = Ipv4Addr::new(192, 168, 10, 100);

        let created = create_new(&store, &net, ip, "aa:bb:cc:dd:ee:01", Some("laptop"), now)
            .await
            .expect("create");
        let first_ends = created.status.as_ref().unwrap().ends.clone();

        let later = now + Duration::from_secs(10);
        let refreshed = refresh(&store, &created, &net, None, later)
            .await
            .expect("refresh");
        let status = refreshed.status.expect("status set");
        assert_eq!(status.hostname, "laptop");
        assert!(status.ends > first_ends);
    }

    #[tokio::test]
    async fn permanent_pool_marks_lease_static_on_refresh() {
        let store = MemoryGateway::new();
        let net = network(false);
        let now = SystemTime::now();
        let ip = Ipv4Addr::new(192, 168, 10, 100);
        let created = create_new(&store, &net, ip, "aa:bb:cc:dd:ee:01", None, now)
            .await
            .expect("create");
        assert!(!created.spec.is_static);

        let permanent_net = network(true);
        let refreshed = refresh(&store, &created, &permanent_net, None, now)
            .await
            .expect("refresh");
        assert!(refreshed.spec.is_static);
    }

    #[test]
    fn expired_non_static_lease_classifies_expired() {
        let lease = Lease {
            metadata: Default::default(),
            spec: LeaseSpec {
                ip: "192.168.10.100".to_string(),
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                pool: "a".to_string(),
                is_static: false,
            },
            status: Some(LeaseStatus {
                hostname: String::new(),
                starts: "0".to_string(),
                ends: "1".to_string(),
            }),
        };
        let now = UNIX_EPOCH + Duration::from_secs(10_000);
        match classify(Some(lease), now) {
            LeaseState::Expired(_) => {}
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[test]
    fn static_lease_never_classifies_expired() {
        let lease = Lease {
            metadata: Default::default(),
            spec: LeaseSpec {
                ip: "192.168.10.100".to_string(),
                mac: "aa:bb:cc:dd:ee:01".to_string(),
                pool: "b".to_string(),
                is_static: true,
            },
            status: Some(LeaseStatus {
                hostname: String::new(),
                starts: "0".to_string(),
                ends: "1".to_string(),
            }),
        };
        let now = UNIX_EPOCH + Duration::from_secs(10_000);
        match classify(Some(lease), now) {
            LeaseState::Static(_) => {}
            other => panic!("expected Static, got {other:?}"),
        }
    }
}
