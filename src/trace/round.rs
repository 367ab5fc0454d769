use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rand::rngs::SmallRng;
use rand::Rng;

use crate::probe::{ProbeOutcome, ProbeTransport};
use crate::state::HopRecord;
use crate::trace::HopMap;

/// One discovery round: a sequential sweep from TTL 1 upward, one probe per
/// TTL with an inter-probe delay, stopping early once a reply arrives from
/// the destination itself.
///
/// Rounds share nothing with each other except the hop map; every merge is
/// one write-lock critical section, and probe issuance (the slow part)
/// happens outside it.
pub struct Round {
    pub(crate) dest: IpAddr,
    pub(crate) source: IpAddr,
    pub(crate) timeout: Duration,
    pub(crate) hop_sleep: Duration,
    pub(crate) max_hops: u8,
    pub(crate) ring_size: usize,
    pub(crate) stats: HopMap,
    pub(crate) transport: Arc<dyn ProbeTransport>,
    /// Round-local generator; seeded per round so concurrent rounds never
    /// share a mutable random source.
    pub(crate) rng: SmallRng,
}

impl Round {
    /// Sweep TTLs until the destination answers or `max_hops` is reached.
    /// Never retries a probe; transport errors count as loss.
    pub fn run(mut self) -> Result<()> {
        let mut seq: u16 = self.rng.gen();
        let ident: u16 = self.rng.gen();
        let dest_str = self.dest.to_string();

        for ttl in 1..self.max_hops {
            seq = seq.wrapping_add(1);
            std::thread::sleep(self.hop_sleep);

            let sent = if self.dest.is_ipv4() {
                self.transport
                    .probe_v4(self.source, self.dest, ttl, ident, self.timeout, seq)
            } else {
                self.transport
                    .probe_v6(self.source, self.dest, ttl, ident, self.timeout, seq)
            };
            let outcome = match sent {
                Ok(outcome) => outcome,
                Err(e) => {
                    log::debug!("probe at ttl {} failed: {:#}", ttl, e);
                    ProbeOutcome::failure(ident, seq)
                }
            };

            let reached = outcome.addr == dest_str;
            self.merge(ttl, outcome, ident);
            if reached {
                break;
            }
        }

        Ok(())
    }

    fn merge(&self, ttl: u8, outcome: ProbeOutcome, ident: u16) {
        let mut stats = self.stats.write();
        let record = stats
            .entry(ttl)
            .or_insert_with(|| HopRecord::new(ttl, self.ring_size));
        record.merge(outcome);
        record.dest = Some(self.dest);
        record.ident = ident;
    }
}
