//! # Pool Index
//!
//! An in-memory, lazily-refreshed view over `Pool` objects: given an IP
//! (relay `giaddr` or a client's requested address), returns the ordered
//! candidate pools whose subnet contains it.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::time::Duration;

use dhcp_types::Pool;
use ipnet::Ipv4Net;
use thiserror::Error;
use tracing::warn;

/// A `Pool` with its string fields parsed and validated, ready for the
/// Allocator and Handler to consume without re-parsing on every packet.
#[derive(Debug, Clone)]
pub struct Network {
    pool: Pool,
    subnet: Ipv4Net,
    range: RangeInclusive<Ipv4Addr>,
    routers: Ipv4Addr,
    broadcast: Option<Ipv4Addr>,
    dns: Vec<Ipv4Addr>,
    ntp: Vec<Ipv4Addr>,
    lease_duration: Duration,
}

/// Why a Pool object failed to parse into a usable [`Network`].
#[derive(Debug, Error)]
pub enum PoolConfigError {
    #[error("invalid subnet {0:?}: {1}")]
    InvalidSubnet(String, ipnet::AddrParseError),
    #[error("invalid address {0:?}: {1}")]
    InvalidAddr(String, std::net::AddrParseError),
    #[error("invalid lease duration {0:?}: {1}")]
    InvalidDuration(String, humantime_like::ParseError),
    #[error("rangeStart {0} is greater than rangeEnd {1}")]
    RangeInverted(Ipv4Addr, Ipv4Addr),
    #[error("range [{0}, {1}] is not contained in subnet {2}")]
    RangeOutsideSubnet(Ipv4Addr, Ipv4Addr, Ipv4Net),
}

/// Minimal `"1h"`/`"90s"`/`"2h30m"`-style duration parser, the shape the
/// control plane's `leaseDuration` field is documented to carry.
mod humantime_like {
    use std::fmt;
    use std::time::Duration;

    #[derive(Debug)]
    pub struct ParseError(pub String);

    impl fmt::Display for ParseError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl std::error::Error for ParseError {}

    /// parse a duration string made of `<number><unit>` pairs, units in
    /// `s`, `m`, `h`, `d` (e.g. `"1h"`, `"90s"`, `"2h30m"`)
    pub fn parse(raw: &str) -> Result<Duration, ParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseError("empty duration".to_string()));
        }
        let mut total = Duration::ZERO;
        let mut digits = String::new();
        for ch in raw.chars() {
            if ch.is_ascii_digit() {
                digits.push(ch);
                continue;
            }
            let unit_secs = match ch {
                's' => 1,
                'm' => 60,
                'h' => 3600,
                'd' => 86_400,
                other => return Err(ParseError(format!("unknown duration unit {other:?}"))),
            };
            let n: u64 = digits
                .parse()
                .map_err(|_| ParseError(format!("invalid number before {ch:?}")))?;
            total += Duration::from_secs(n * unit_secs);
            digits.clear();
        }
        if !digits.is_empty() {
            return Err(ParseError("trailing digits with no unit".to_string()));
        }
        if total.is_zero() {
            return Err(ParseError("duration must be positive".to_string()));
        }
        Ok(total)
    }
}

impl Network {
    /// the underlying Pool object
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// name of the owning Pool
    pub fn name(&self) -> &str {
        self.pool.metadata.name.as_deref().unwrap_or_default()
    }

    /// lower wins in priority ordering
    pub fn priority(&self) -> i32 {
        self.pool.spec.priority
    }

    /// the CIDR this pool serves
    pub fn subnet(&self) -> Ipv4Net {
        self.subnet
    }

    /// the inclusive assignable range within `subnet`
    pub fn range(&self) -> &RangeInclusive<Ipv4Addr> {
        &self.range
    }

    /// whether `ip` falls within the assignable range
    pub fn in_range(&self, ip: Ipv4Addr) -> bool {
        self.range.contains(&ip)
    }

    /// router address to hand out as option 3
    pub fn routers(&self) -> Ipv4Addr {
        self.routers
    }

    /// broadcast address to hand out as option 28, if configured
    pub fn broadcast(&self) -> Option<Ipv4Addr> {
        self.broadcast
    }

    /// DNS servers to hand out as option 6
    pub fn dns(&self) -> &[Ipv4Addr] {
        &self.dns
    }

    /// NTP servers to hand out as option 42
    pub fn ntp(&self) -> &[Ipv4Addr] {
        &self.ntp
    }

    /// lease duration configured for this pool
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// leases from this pool are marked static and never reaped
    pub fn permanent(&self) -> bool {
        self.pool.spec.permanent
    }

    /// boot file name served via the BOOTP header, may be empty
    pub fn boot_filename(&self) -> &str {
        &self.pool.spec.boot_filename
    }

    /// count of usable host addresses in `range`
    pub fn total_addrs(&self) -> u32 {
        u32::from(*self.range.end()) - u32::from(*self.range.start()) + 1
    }
}

impl TryFrom<Pool> for Network {
    type Error = PoolConfigError;

    fn try_from(pool: Pool) -> Result<Self, Self::Error> {
        let subnet: Ipv4Net = pool
            .spec
            .subnet
            .parse()
            .map_err(|err| PoolConfigError::InvalidSubnet(pool.spec.subnet.clone(), err))?;
        let range_start: Ipv4Addr = pool
            .spec
            .range_start
            .parse()
            .map_err(|err| PoolConfigError::InvalidAddr(pool.spec.range_start.clone(), err))?;
        let range_end: Ipv4Addr = pool
            .spec
            .range_end
            .parse()
            .map_err(|err| PoolConfigError::InvalidAddr(pool.spec.range_end.clone(), err))?;
        if u32::from(range_start) > u32::from(range_end) {
            return Err(PoolConfigError::RangeInverted(range_start, range_end));
        }
        if !subnet.contains(&range_start) || !subnet.contains(&range_end) {
            return Err(PoolConfigError::RangeOutsideSubnet(
                range_start,
                range_end,
                subnet,
            ));
        }
        let routers: Ipv4Addr = pool
            .spec
            .routers
            .parse()
            .map_err(|err| PoolConfigError::InvalidAddr(pool.spec.routers.clone(), err))?;
        let broadcast = pool
            .spec
            .broadcast
            .as_deref()
            .map(|raw| {
                raw.parse()
                    .map_err(|err| PoolConfigError::InvalidAddr(raw.to_string(), err))
            })
            .transpose()?;
        let dns = pool
            .spec
            .dns
            .iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|err| PoolConfigError::InvalidAddr(raw.clone(), err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let ntp = pool
            .spec
            .ntp
            .iter()
            .map(|raw| {
                raw.parse()
                    .map_err(|err| PoolConfigError::InvalidAddr(raw.clone(), err))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let lease_duration = humantime_like::parse(&pool.spec.lease_duration)
            .map_err(|err| PoolConfigError::InvalidDuration(pool.spec.lease_duration.clone(), err))?;

        Ok(Network {
            pool,
            subnet,
            range: range_start..=range_end,
            routers,
            broadcast,
            dns,
            ntp,
            lease_duration,
        })
    }
}

/// `Candidates(ip, mustBeInRange) -> ordered list of Pool`: enumerates
/// every Pool, keeps those whose subnet contains `ip`, optionally
/// restricted to pools whose range also contains it, ordered ascending
/// by priority then name. Malformed pools are logged and skipped.
pub fn candidates(pools: Vec<Pool>, ip: Ipv4Addr, must_be_in_range: bool) -> Vec<Network> {
    let mut nets: Vec<Network> = pools
        .into_iter()
        .filter_map(|pool| {
            let name = pool.metadata.name.clone().unwrap_or_default();
            match Network::try_from(pool) {
                Ok(net) => Some(net),
                Err(err) => {
                    warn!(pool = %name, %err, "skipping malformed pool");
                    None
                }
            }
        })
        .filter(|net| net.subnet.contains(&ip) && (!must_be_in_range || net.in_range(ip)))
        .collect();

    nets.sort_by(|a, b| a.priority().cmp(&b.priority()).then_with(|| a.name().cmp(b.name())));

    crate::metrics::TOTAL_AVAILABLE_ADDRS.set(nets.iter().map(|net| net.total_addrs() as i64).sum());

    nets
}
