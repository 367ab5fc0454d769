use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Args;

/// Runtime configuration derived from CLI args
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Destination host (name or literal address, resolved at construction)
    pub destination: String,
    /// Source address (family-appropriate wildcard when unset)
    pub source: Option<IpAddr>,
    /// Number of concurrent discovery rounds
    pub count: usize,
    /// Per-probe timeout
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
    /// Delay before each probe within a round
    #[serde(with = "duration_serde")]
    pub hop_sleep: Duration,
    /// Maximum TTL to probe
    pub max_hops: u8,
    /// Maximum consecutive non-responding hops; reserved for a future
    /// truncation policy, carried through unchanged for now
    pub max_unknown_hops: u8,
    /// Capacity of the per-hop sample ring
    pub ring_size: usize,
    /// Enable reverse DNS lookups
    pub ptr_lookup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            destination: String::new(),
            source: None,
            count: 3,
            timeout: Duration::from_secs(1),
            hop_sleep: Duration::from_millis(100),
            max_hops: 30,
            max_unknown_hops: 10,
            ring_size: 10,
            ptr_lookup: true,
        }
    }
}

impl From<&Args> for Config {
    fn from(args: &Args) -> Self {
        Self {
            destination: args.target.clone(),
            source: args.source,
            count: args.count,
            timeout: args.timeout_duration(),
            hop_sleep: args.hop_sleep_duration(),
            max_hops: args.max_ttl,
            max_unknown_hops: args.max_unknown_hops,
            ring_size: args.ring_size,
            ptr_lookup: !args.no_dns,
        }
    }
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
