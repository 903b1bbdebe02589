//! # Allocator
//!
//! Given a packet and a candidate pool, computes the next address to
//! offer, enforcing range membership, uniqueness against current leases,
//! and the lowest-numeric-IP tie-break.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use crate::pool_index::Network;

/// Outcome of [`choose_ip`] when no address was available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoneAvailable;

/// `ChooseIP(pool, requestedIP, activeLeases) -> IP | NoneAvailable`.
///
/// 1. If `requested` is set, in range, and free, return it.
/// 2. Otherwise walk the pool's hosts in ascending numeric order
///    (network/broadcast already excluded by [`ipnet::Ipv4Net::hosts`]),
///    filtered to the configured range, and return the first free one.
/// 3. If none remain, [`NoneAvailable`].
pub fn choose_ip(
    network: &Network,
    requested: Option<Ipv4Addr>,
    active: &HashSet<Ipv4Addr>,
) -> Result<Ipv4Addr, NoneAvailable> {
    if let Some(ip) = requested
        && network.in_range(ip)
        && !active.contains(&ip)
    {
        return Ok(ip);
    }

    network
        .subnet()
        .hosts()
        .filter(|ip| network.in_range(*ip) && !active.contains(ip))
        .next()
        .ok_or(NoneAvailable)
}
