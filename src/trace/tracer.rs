use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::config::Config;
use crate::lookup::ReverseResolver;
use crate::probe::{IcmpTransport, ProbeTransport};
use crate::state::{HopRecord, HopReport};
use crate::trace::Round;

/// Shared TTL → HopRecord mapping.
///
/// One coarse lock guards every read-modify-write sequence; presentation
/// reads take the shared side and copy whole records, so a snapshot never
/// mixes fields from two merges.
pub type HopMap = Arc<RwLock<HashMap<u8, HopRecord>>>;

/// Orchestrates concurrent discovery rounds over a shared hop map.
pub struct Tracer {
    config: Config,
    dest: IpAddr,
    source: IpAddr,
    started_at: DateTime<Utc>,
    stats: HopMap,
    transport: Arc<dyn ProbeTransport>,
}

impl Tracer {
    /// Build a tracer probing over the system ICMP transport.
    ///
    /// Fails fast, creating no state, when the destination cannot be
    /// resolved or the platform grants no usable ICMP socket.
    pub fn new(config: Config) -> Result<Self> {
        let transport = Arc::new(IcmpTransport::new()?);
        Self::with_transport(config, transport)
    }

    /// Build a tracer over a caller-supplied transport.
    pub fn with_transport(config: Config, transport: Arc<dyn ProbeTransport>) -> Result<Self> {
        let dest = resolve_destination(&config.destination)?;
        let source = config.source.unwrap_or(match dest {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        if source.is_ipv4() != dest.is_ipv4() {
            anyhow::bail!(
                "source address {} does not match the address family of {}",
                source,
                dest
            );
        }

        Ok(Self {
            config,
            dest,
            source,
            started_at: Utc::now(),
            stats: Arc::new(RwLock::new(HashMap::new())),
            transport,
        })
    }

    /// Launch the configured number of discovery rounds and wait for all of
    /// them to finish.
    ///
    /// Rounds run independently: a panic inside one is recovered at the
    /// join boundary and converted into an error without interrupting its
    /// siblings. The first error wins when several rounds fail.
    pub async fn run(&self) -> Result<()> {
        let seed: u64 = rand::random();

        let mut rounds = Vec::with_capacity(self.config.count);
        for index in 0..self.config.count {
            let round = Round {
                dest: self.dest,
                source: self.source,
                timeout: self.config.timeout,
                hop_sleep: self.config.hop_sleep,
                max_hops: self.config.max_hops,
                ring_size: self.config.ring_size,
                stats: self.stats.clone(),
                transport: self.transport.clone(),
                rng: SmallRng::seed_from_u64(seed.wrapping_add(index as u64)),
            };
            rounds.push(tokio::task::spawn_blocking(move || round.run()));
        }

        let mut first_err: Option<anyhow::Error> = None;
        for handle in rounds {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) if e.is_panic() => {
                    let payload = e.into_panic();
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(anyhow!("discovery round panicked: {}", msg))
                }
                Err(e) => Err(anyhow!("discovery round failed to join: {}", e)),
            };
            if let Err(e) = result {
                log::warn!("discovery round failed: {:#}", e);
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Read-only snapshots of every discovered hop, ordered by TTL.
    pub fn reports(&self) -> Vec<HopReport> {
        let stats = self.stats.read();
        let mut ttls: Vec<u8> = stats.keys().copied().collect();
        ttls.sort_unstable();
        ttls.iter()
            .filter_map(|ttl| stats.get(ttl))
            .map(HopRecord::report)
            .collect()
    }

    /// Display names for every responder recorded at `ttl`, in first-seen
    /// order, honoring the configured reverse-lookup mode.
    pub fn resolve_names(&self, ttl: u8, resolver: &dyn ReverseResolver) -> Vec<String> {
        let mut stats = self.stats.write();
        let Some(record) = stats.get_mut(&ttl) else {
            return Vec::new();
        };
        (0..record.targets.len())
            .map(|index| record.resolve(self.config.ptr_lookup, index, resolver))
            .collect()
    }

    pub fn destination(&self) -> IpAddr {
        self.dest
    }

    pub fn source(&self) -> IpAddr {
        self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Resolve a destination name or literal to one address, preferring IPv4
/// when a hostname resolves to both families.
fn resolve_destination(dest: &str) -> Result<IpAddr> {
    if let Ok(ip) = dest.parse::<IpAddr>() {
        return Ok(ip);
    }

    let addrs: Vec<IpAddr> = format!("{}:0", dest)
        .to_socket_addrs()
        .with_context(|| format!("invalid host or ip provided: {}", dest))?
        .map(|s| s.ip())
        .collect();

    if let Some(v4) = addrs.iter().find(|ip| ip.is_ipv4()) {
        return Ok(*v4);
    }
    addrs
        .first()
        .copied()
        .ok_or_else(|| anyhow!("no addresses found for {}", dest))
}
