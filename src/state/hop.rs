use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::lookup::ReverseResolver;
use crate::probe::ProbeOutcome;

/// Statistics and state for one TTL along the path.
///
/// Records are created lazily on the first probe merged for a TTL, live for
/// the whole orchestrator run and are owned exclusively by the orchestrator:
/// they escape only as read-only [`HopReport`] snapshots.
#[derive(Debug, Clone)]
pub struct HopRecord {
    pub ttl: u8,
    pub sent: u64,
    pub lost: u64,
    /// Sum over successful probes only, backing the O(1) running mean.
    pub sum_elapsed: Duration,
    pub last: ProbeOutcome,
    /// Undefined until the first successful probe.
    pub best: Option<ProbeOutcome>,
    pub worst: Option<ProbeOutcome>,
    /// Distinct responding addresses, insertion order. May transiently hold
    /// a single empty placeholder until a real address responds.
    pub targets: Vec<String>,
    /// Resolved destination of the round that last merged into this record.
    pub dest: Option<IpAddr>,
    /// Probe identifier of the round that last merged into this record.
    pub ident: u16,
    packets: Vec<Option<ProbeOutcome>>,
    /// Next ring slot to overwrite; the slot one before it is the newest.
    head: usize,
    resolved: HashMap<String, String>,
}

impl HopRecord {
    pub fn new(ttl: u8, ring_size: usize) -> Self {
        Self {
            ttl,
            sent: 0,
            lost: 0,
            sum_elapsed: Duration::ZERO,
            last: ProbeOutcome::default(),
            best: None,
            worst: None,
            targets: Vec::new(),
            dest: None,
            ident: 0,
            packets: vec![None; ring_size.max(1)],
            head: 0,
            resolved: HashMap::new(),
        }
    }

    /// Fold one probe outcome into the record.
    ///
    /// Must be called with the orchestrator's write lock held. Total over
    /// any outcome: a failed probe updates presence and history but never
    /// the latency aggregates.
    pub fn merge(&mut self, outcome: ProbeOutcome) {
        self.sent += 1;
        self.push_target(&outcome.addr);

        self.packets[self.head] = Some(outcome.clone());
        self.head = (self.head + 1) % self.packets.len();

        self.last = outcome.clone();

        if !outcome.success {
            self.lost += 1;
            return;
        }

        self.sum_elapsed += outcome.elapsed;
        if self.best.as_ref().map_or(true, |b| outcome.elapsed < b.elapsed) {
            self.best = Some(outcome.clone());
        }
        if self.worst.as_ref().map_or(true, |w| outcome.elapsed > w.elapsed) {
            self.worst = Some(outcome);
        }
    }

    /// Record a responding address, keeping the set duplicate-free. The
    /// empty "no answer" placeholder is only ever the sole entry: it is
    /// dropped as soon as a real address responds, and never added next to
    /// one.
    fn push_target(&mut self, addr: &str) {
        if self.targets.iter().any(|t| t == addr) {
            return;
        }
        if !self.targets.is_empty() {
            if addr.is_empty() {
                return;
            }
            self.targets.retain(|t| !t.is_empty());
        }
        self.targets.push(addr.to_string());
    }

    pub fn successes(&self) -> u64 {
        self.sent - self.lost
    }

    /// Loss percentage; 0 before any probe has been sent.
    pub fn loss_pct(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64 * 100.0
        }
    }

    /// Running mean over every successful probe ever merged, in
    /// milliseconds. Not bounded by the ring.
    pub fn avg_ms(&self) -> f64 {
        if self.successes() == 0 {
            0.0
        } else {
            duration_ms(self.sum_elapsed) / self.successes() as f64
        }
    }

    /// Population standard deviation over the successful samples currently
    /// in the ring, measured against [`avg_ms`](Self::avg_ms). Mixing the
    /// all-time mean with a windowed variance matches the deployed JSON
    /// consumers; see DESIGN.md before changing it.
    pub fn stdev_ms(&self) -> f64 {
        let avg = self.avg_ms();
        let mut sum_squares = 0.0;
        let mut count = 0u32;
        for outcome in self.packets.iter().flatten().filter(|p| p.success) {
            let distance = duration_ms(outcome.elapsed) - avg;
            sum_squares += distance * distance;
            count += 1;
        }
        if count == 0 {
            0.0
        } else {
            (sum_squares / f64::from(count)).sqrt()
        }
    }

    /// Ring slots oldest-to-newest, starting one past the most recently
    /// written slot. Always yields exactly the ring capacity, with `None`
    /// for positions no probe has reached yet.
    pub fn ordered_samples(&self) -> impl Iterator<Item = Option<&ProbeOutcome>> + '_ {
        let cap = self.packets.len();
        (0..cap).map(move |offset| self.packets[(self.head + offset) % cap].as_ref())
    }

    /// Display name for the responder at `index` in the target set.
    ///
    /// Returns `"???"` when nothing has responded at that position. With
    /// reverse lookup disabled the raw address is returned but still cached,
    /// so a later mode change keeps repeated lookups consistent. Lookup
    /// failures silently degrade to the raw address.
    pub fn resolve(
        &mut self,
        ptr_lookup: bool,
        index: usize,
        resolver: &dyn ReverseResolver,
    ) -> String {
        let Some(target) = self.targets.get(index) else {
            return "???".to_string();
        };
        if target.is_empty() {
            return "???".to_string();
        }
        let target = target.clone();

        let mut name = target.clone();
        if ptr_lookup {
            if let Some(cached) = self.resolved.get(&target) {
                return cached.clone();
            }
            match resolver.lookup(&target) {
                Ok(names) if !names.is_empty() => name = names[0].clone(),
                _ => {}
            }
        }
        self.resolved.insert(target, name.clone());
        name
    }

    /// Derived, read-only snapshot in the exported wire shape.
    pub fn report(&self) -> HopReport {
        HopReport {
            sent: self.sent,
            target: self.targets.join(", "),
            last_ms: duration_ms(self.last.elapsed),
            best_ms: self.best.as_ref().map_or(0.0, |p| duration_ms(p.elapsed)),
            worst_ms: self.worst.as_ref().map_or(0.0, |p| duration_ms(p.elapsed)),
            loss_percent: self.loss_pct(),
            avg_ms: self.avg_ms(),
            stdev_ms: self.stdev_ms(),
            packet_buffer_size: self.packets.len(),
            ttl: self.ttl,
            packet_list_ms: self
                .ordered_samples()
                .map(|slot| {
                    slot.map(|p| PacketSample {
                        success: p.success,
                        respond_ms: if p.success { duration_ms(p.elapsed) } else { 0.0 },
                    })
                })
                .collect(),
        }
    }
}

/// One ring slot as exported: `null` slots are positions no probe has
/// reached yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketSample {
    pub success: bool,
    pub respond_ms: f64,
}

/// Per-hop snapshot serialized for external consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopReport {
    pub sent: u64,
    pub target: String,
    pub last_ms: f64,
    pub best_ms: f64,
    pub worst_ms: f64,
    pub loss_percent: f64,
    pub avg_ms: f64,
    pub stdev_ms: f64,
    pub packet_buffer_size: usize,
    pub ttl: u8,
    pub packet_list_ms: Vec<Option<PacketSample>>,
}

fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
