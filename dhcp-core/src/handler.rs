//! # Handler
//!
//! Single entry point per UDP datagram. Acquires the global serializer
//! lock for the whole transaction, dispatches by DHCPv4 message type,
//! and composes the reply.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use dhcp_types::{Lease, Pool};
use dhcproto::v4::{DhcpOption, Message, MessageType, OptionCode};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::allocator;
use crate::lease::{self, LeaseState};
use crate::mac;
use crate::metrics;
use crate::pool_index::{self, Network};
use crate::store::LeaseStore;

/// Dispatches DHCPv4 messages against a [`LeaseStore`], serializing every
/// state-touching operation on a single process-wide lock (spec §5).
#[derive(Debug)]
pub struct Handler<S> {
    store: Arc<S>,
    lock: Arc<Mutex<()>>,
    server_identity: Option<Ipv4Addr>,
}

impl<S: LeaseStore> Handler<S> {
    /// build a new Handler sharing `lock` with the Janitor
    pub fn new(store: Arc<S>, lock: Arc<Mutex<()>>, server_identity: Option<Ipv4Addr>) -> Self {
        Self {
            store,
            lock,
            server_identity,
        }
    }

    /// handle a single decoded request, returning the reply to send (if
    /// any) back to the peer the datagram was received from
    #[instrument(level = "debug", skip_all, fields(mac))]
    pub async fn handle(&self, req: &Message) -> Option<Message> {
        let _guard = self.lock.lock().await;
        metrics::IN_FLIGHT.inc();
        let start = Instant::now();

        let mac = mac::canonical(req.chaddr());
        tracing::Span::current().record("mac", mac.as_str());

        let msg_type = req.opts().msg_type();
        record_recv(msg_type);

        let resp = match msg_type {
            Some(MessageType::Discover) => self.discover(req, &mac).await,
            Some(MessageType::Request) => self.request(req, &mac).await,
            Some(MessageType::Release) => {
                self.release(&mac).await;
                None
            }
            Some(MessageType::Inform) => {
                debug!(%mac, "INFORM received, dropping");
                None
            }
            other => {
                debug!(?other, %mac, "unsupported or missing message type, dropping");
                None
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        let sent_type = resp.as_ref().and_then(|resp| resp.opts().msg_type());
        if resp.is_some() {
            record_sent(sent_type);
        }
        metrics::HANDLER_DURATION
            .with_label_values(&[msg_type_label(sent_type)])
            .observe(elapsed);

        metrics::IN_FLIGHT.dec();
        resp
    }

    async fn discover(&self, req: &Message, mac: &str) -> Option<Message> {
        let now = SystemTime::now();
        let (lease, network) = self.resolve(req, mac, now).await?;
        Some(self.compose_reply(req, MessageType::Offer, &lease, &network))
    }

    async fn request(&self, req: &Message, mac: &str) -> Option<Message> {
        let now = SystemTime::now();
        let (lease, network) = self.resolve(req, mac, now).await?;
        Some(self.compose_reply(req, MessageType::Ack, &lease, &network))
    }

    /// shared DISCOVER/REQUEST resolution path: refresh the lease for
    /// `mac` if one is already bound, otherwise allocate a new one.
    async fn resolve(&self, req: &Message, mac: &str, now: SystemTime) -> Option<(Lease, Network)> {
        let existing = match self.store.find_lease_by_mac(mac).await {
            Ok(lease) => lease,
            Err(err) => {
                error!(%err, %mac, "store error resolving lease by mac");
                return None;
            }
        };

        let pools = match self.store.list_pools().await {
            Ok(pools) => pools,
            Err(err) => {
                error!(%err, "store error listing pools");
                return None;
            }
        };

        match lease::classify(existing, now) {
            LeaseState::Bound(lease) | LeaseState::Static(lease) => {
                self.refresh_existing(req, lease, pools, now).await
            }
            LeaseState::Expired(_) | LeaseState::Absent => {
                self.allocate_new(req, mac, pools, now).await
            }
        }
    }

    async fn refresh_existing(
        &self,
        req: &Message,
        lease: Lease,
        pools: Vec<Pool>,
        now: SystemTime,
    ) -> Option<(Lease, Network)> {
        let network = pools
            .into_iter()
            .find(|pool| pool.metadata.name.as_deref() == Some(lease.spec.pool.as_str()))
            .and_then(|pool| Network::try_from(pool).ok());
        let Some(network) = network else {
            warn!(ip = %lease.spec.ip, pool = %lease.spec.pool, "lease refers to unknown or malformed pool");
            return None;
        };

        let hostname = hostname_opt(req);
        match lease::refresh(&*self.store, &lease, &network, hostname.as_deref(), now).await {
            Ok(refreshed) => Some((refreshed, network)),
            Err(err) => {
                error!(%err, ip = %lease.spec.ip, "store error refreshing lease");
                None
            }
        }
    }

    async fn allocate_new(
        &self,
        req: &Message,
        mac: &str,
        pools: Vec<Pool>,
        now: SystemTime,
    ) -> Option<(Lease, Network)> {
        let requested_ip = requested_ip_opt(req);
        let (anchor, must_be_in_range) = match requested_ip {
            Some(ip) => (ip, true),
            None => (req.giaddr(), false),
        };

        let candidates = pool_index::candidates(pools, anchor, must_be_in_range);
        if candidates.is_empty() {
            debug!(%mac, %anchor, "no candidate pools for this relay");
            return None;
        }

        let active = match self.store.list_leases().await {
            Ok(leases) => leases
                .into_iter()
                .filter_map(|lease| lease.spec.ip.parse::<Ipv4Addr>().ok())
                .collect::<HashSet<_>>(),
            Err(err) => {
                error!(%err, "store error listing leases for allocation");
                return None;
            }
        };

        for network in candidates {
            match allocator::choose_ip(&network, requested_ip, &active) {
                Ok(ip) => {
                    let hostname = hostname_opt(req);
                    return match lease::create_new(
                        &*self.store,
                        &network,
                        ip,
                        mac,
                        hostname.as_deref(),
                        now,
                    )
                    .await
                    {
                        Ok(lease) => Some((lease, network)),
                        Err(err) => {
                            error!(%err, %ip, %mac, "store error creating lease");
                            None
                        }
                    };
                }
                Err(allocator::NoneAvailable) => continue,
            }
        }

        metrics::ALLOCATION_EXHAUSTED.inc();
        error!(%mac, %anchor, "allocation exhausted: no free address in any candidate pool");
        None
    }

    async fn release(&self, mac: &str) {
        match self.store.find_lease_by_mac(mac).await {
            Ok(Some(lease)) => {
                let ip = lease.spec.ip.clone();
                if let Err(err) = lease::release(&*self.store, &lease).await {
                    error!(%err, %mac, "store error releasing lease");
                } else {
                    debug!(%mac, %ip, "released lease");
                }
            }
            Ok(None) => debug!(%mac, "release for unknown mac, dropping"),
            Err(err) => error!(%err, %mac, "store error looking up lease to release"),
        }
    }

    fn compose_reply(
        &self,
        req: &Message,
        msg_type: MessageType,
        lease: &Lease,
        network: &Network,
    ) -> Message {
        let ip: Ipv4Addr = lease.spec.ip.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
        let mut resp = Message::new_with_id(
            req.xid(),
            Ipv4Addr::UNSPECIFIED,
            ip,
            Ipv4Addr::UNSPECIFIED,
            req.giaddr(),
            req.chaddr(),
        );
        resp.set_flags(req.flags());
        resp.set_fname_str(network.boot_filename());

        let server_identifier = self.server_identity.unwrap_or(req.giaddr());

        let opts = resp.opts_mut();
        opts.insert(DhcpOption::MessageType(msg_type));
        opts.insert(DhcpOption::ServerIdentifier(server_identifier));
        opts.insert(DhcpOption::SubnetMask(network.subnet().netmask()));
        opts.insert(DhcpOption::Router(vec![network.routers()]));
        if !network.dns().is_empty() {
            opts.insert(DhcpOption::DomainNameServer(network.dns().to_vec()));
        }
        if !network.ntp().is_empty() {
            opts.insert(DhcpOption::NTPServers(network.ntp().to_vec()));
        }
        opts.insert(DhcpOption::AddressLeaseTime(
            network.lease_duration().as_secs() as u32,
        ));
        if let Some(status) = &lease.status
            && !status.hostname.is_empty()
        {
            opts.insert(DhcpOption::Hostname(status.hostname.clone()));
        }
        opts.insert(DhcpOption::RequestedIpAddress(ip));
        resp
    }
}

fn hostname_opt(req: &Message) -> Option<String> {
    match req.opts().get(OptionCode::Hostname) {
        Some(DhcpOption::Hostname(name)) => Some(name.clone()),
        _ => None,
    }
}

fn requested_ip_opt(req: &Message) -> Option<Ipv4Addr> {
    match req.opts().get(OptionCode::RequestedIpAddress) {
        Some(DhcpOption::RequestedIpAddress(ip)) if !ip.is_unspecified() => Some(*ip),
        _ => None,
    }
}

fn record_recv(msg_type: Option<MessageType>) {
    use crate::metrics::MsgType as M;
    let label = match msg_type {
        Some(MessageType::Discover) => M::discover,
        Some(MessageType::Request) => M::request,
        Some(MessageType::Release) => M::release,
        Some(MessageType::Offer) => M::offer,
        Some(MessageType::Ack) => M::ack,
        Some(MessageType::Nak) => M::nak,
        Some(MessageType::Inform) => M::inform,
        _ => M::unknown,
    };
    metrics::RECV_TYPE_COUNT.get(label).inc();
}

fn record_sent(msg_type: Option<MessageType>) {
    use crate::metrics::MsgType as M;
    let label = match msg_type {
        Some(MessageType::Offer) => M::offer,
        Some(MessageType::Ack) => M::ack,
        Some(MessageType::Nak) => M::nak,
        _ => M::unknown,
    };
    metrics::SENT_TYPE_COUNT.get(label).inc();
}

/// label value for `HANDLER_DURATION`, covering the silently-dropped case
fn msg_type_label(msg_type: Option<MessageType>) -> &'static str {
    match msg_type {
        Some(MessageType::Offer) => "offer",
        Some(MessageType::Ack) => "ack",
        Some(MessageType::Nak) => "nak",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryGateway;
    use dhcp_types::PoolSpec;
    use dhcproto::v4::Flags;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn pool(name: &str, priority: i32, start: &str, end: &str) -> Pool {
        Pool {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: PoolSpec {
                priority,
                subnet: "192.168.10.0/24".to_string(),
                range_start: start.to_string(),
                range_end: end.to_string(),
                routers: "192.168.10.1".to_string(),
                broadcast: None,
                dns: vec![],
                ntp: vec![],
                domain: None,
                lease_duration: "1h".to_string(),
                boot_filename: String::new(),
                permanent: false,
            },
        }
    }

    fn discover(giaddr: Ipv4Addr, chaddr: &[u8]) -> Message {
        let mut msg = Message::new_with_id(
            1,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            giaddr,
            chaddr,
        );
        msg.set_flags(Flags::default().set_broadcast());
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Discover));
        msg
    }

    fn request(giaddr: Ipv4Addr, chaddr: &[u8]) -> Message {
        let mut msg = discover(giaddr, chaddr);
        msg.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Request));
        msg
    }

    #[tokio::test]
    async fn discover_assigns_lowest_free_address_and_offers() {
        let store = Arc::new(MemoryGateway::with_pools(vec![pool(
            "a",
            1,
            "192.168.10.100",
            "192.168.10.110",
        )]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);
        let req = discover(
            Ipv4Addr::new(192, 168, 10, 1),
            &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01],
        );

        let resp = handler.handle(&req).await.expect("offer expected");
        assert_eq!(resp.yiaddr(), Ipv4Addr::new(192, 168, 10, 100));
        assert_eq!(resp.opts().msg_type(), Some(MessageType::Offer));
    }

    #[tokio::test]
    async fn repeated_discover_is_idempotent() {
        let store = Arc::new(MemoryGateway::with_pools(vec![pool(
            "a",
            1,
            "192.168.10.100",
            "192.168.10.110",
        )]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);
        let chaddr = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        let first = handler
            .handle(&discover(Ipv4Addr::new(192, 168, 10, 1), &chaddr))
            .await
            .expect("first offer");
        let second = handler
            .handle(&discover(Ipv4Addr::new(192, 168, 10, 1), &chaddr))
            .await
            .expect("second offer");

        assert_eq!(first.yiaddr(), second.yiaddr());
    }

    #[tokio::test]
    async fn request_with_unknown_mac_falls_through_to_new_bind_and_acks() {
        let store = Arc::new(MemoryGateway::with_pools(vec![pool(
            "a",
            1,
            "192.168.10.100",
            "192.168.10.110",
        )]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);
        let req = request(
            Ipv4Addr::new(192, 168, 10, 1),
            &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02],
        );

        let resp = handler.handle(&req).await.expect("ack expected");
        assert_eq!(resp.opts().msg_type(), Some(MessageType::Ack));
        assert_eq!(resp.yiaddr(), Ipv4Addr::new(192, 168, 10, 100));
    }

    #[tokio::test]
    async fn allocation_exhausted_drops_silently() {
        let store = Arc::new(MemoryGateway::with_pools(vec![pool(
            "a",
            1,
            "192.168.10.100",
            "192.168.10.100",
        )]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);

        let first = handler
            .handle(&discover(
                Ipv4Addr::new(192, 168, 10, 1),
                &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01],
            ))
            .await;
        assert!(first.is_some());

        let second = handler
            .handle(&discover(
                Ipv4Addr::new(192, 168, 10, 1),
                &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02],
            ))
            .await;
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_frees_address_for_reuse() {
        let store = Arc::new(MemoryGateway::with_pools(vec![pool(
            "a",
            1,
            "192.168.10.100",
            "192.168.10.100",
        )]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);
        let first_mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01];

        handler
            .handle(&discover(Ipv4Addr::new(192, 168, 10, 1), &first_mac))
            .await
            .expect("first offer");

        let mut rel = discover(Ipv4Addr::new(192, 168, 10, 1), &first_mac);
        rel.opts_mut()
            .insert(DhcpOption::MessageType(MessageType::Release));
        assert!(handler.handle(&rel).await.is_none());

        let second_mac = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02];
        let second = handler
            .handle(&discover(Ipv4Addr::new(192, 168, 10, 1), &second_mac))
            .await
            .expect("address reused after release");
        assert_eq!(second.yiaddr(), Ipv4Addr::new(192, 168, 10, 100));
    }

    #[tokio::test]
    async fn discover_falls_through_to_lower_priority_pool_once_higher_exhausted() {
        let store = Arc::new(MemoryGateway::with_pools(vec![
            pool("p1", 1, "192.168.10.100", "192.168.10.100"),
            pool("p2", 5, "192.168.10.150", "192.168.10.160"),
        ]));
        let handler = Handler::new(store, Arc::new(Mutex::new(())), None);
        let giaddr = Ipv4Addr::new(192, 168, 10, 1);

        let from_p1 = handler
            .handle(&discover(giaddr, &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x01]))
            .await
            .expect("offer from p1");
        assert_eq!(from_p1.yiaddr(), Ipv4Addr::new(192, 168, 10, 100));

        let from_p2 = handler
            .handle(&discover(giaddr, &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0x02]))
            .await
            .expect("p1 exhausted, offer from p2");
        assert_eq!(from_p2.yiaddr(), Ipv4Addr::new(192, 168, 10, 150));
    }
}
