pub mod icmp;

pub use icmp::*;

use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;

/// Outcome of a single probe at one TTL.
///
/// Produced by a [`ProbeTransport`] and immutable afterwards. A probe that
/// received no valid reply within the timeout has `success == false`, a zero
/// `elapsed` and an empty `addr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub success: bool,
    /// Round-trip time, meaningful only when `success` is true.
    pub elapsed: Duration,
    /// Responding address, empty when no reply arrived.
    pub addr: String,
    pub ident: u16,
    pub seq: u16,
}

impl ProbeOutcome {
    /// A failed probe (timeout or transport-level error).
    pub fn failure(ident: u16, seq: u16) -> Self {
        Self {
            ident,
            seq,
            ..Default::default()
        }
    }
}

/// Transport seam: send one probe with the given TTL and block until a
/// matching reply arrives or `timeout` expires.
///
/// Implementations must be shareable across concurrently running discovery
/// rounds. A returned error is absorbed by the caller as a failed probe and
/// is never retried at this layer.
pub trait ProbeTransport: Send + Sync {
    /// Probe an IPv4 destination.
    fn probe_v4(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome>;

    /// Probe an IPv6 destination.
    fn probe_v6(
        &self,
        source: IpAddr,
        dest: IpAddr,
        ttl: u8,
        ident: u16,
        timeout: Duration,
        seq: u16,
    ) -> Result<ProbeOutcome>;
}
