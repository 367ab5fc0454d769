use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

/// Traceroute-style hop discovery with ping-style latency statistics
#[derive(Parser, Debug, Clone)]
#[command(name = "hopstat")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Target host to trace (IP address or hostname)
    pub target: String,

    /// Source address (defaults to the family-appropriate wildcard)
    #[arg(short = 'a', long = "source")]
    pub source: Option<IpAddr>,

    /// Number of concurrent discovery rounds
    #[arg(short = 'c', long = "count", default_value = "3")]
    pub count: usize,

    /// Per-probe timeout in seconds
    #[arg(long = "timeout", default_value = "1.0")]
    pub timeout: f64,

    /// Delay before each probe in seconds
    #[arg(long = "hop-sleep", default_value = "0.1")]
    pub hop_sleep: f64,

    /// Maximum TTL (hops)
    #[arg(short = 'm', long = "max-ttl", default_value = "30")]
    pub max_ttl: u8,

    /// Maximum consecutive non-responding hops before truncation
    #[arg(long = "max-unknown-hops", default_value = "10")]
    pub max_unknown_hops: u8,

    /// Per-hop sample ring capacity
    #[arg(long = "ring-size", default_value = "10")]
    pub ring_size: usize,

    /// Skip reverse DNS lookups
    #[arg(short = 'n', long = "no-dns")]
    pub no_dns: bool,

    /// Print an mtr-style text report instead of JSON
    #[arg(long = "report")]
    pub report: bool,

    /// Print CSV instead of JSON
    #[arg(long = "csv")]
    pub csv: bool,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

impl Args {
    /// Get per-probe timeout as Duration
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs_f64(self.timeout)
    }

    /// Get inter-probe delay as Duration
    pub fn hop_sleep_duration(&self) -> Duration {
        Duration::from_secs_f64(self.hop_sleep)
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if self.report && self.csv {
            return Err("Cannot combine --report and --csv".into());
        }

        if self.count == 0 {
            return Err("Count must be at least 1".into());
        }
        const MAX_ROUNDS: usize = 64;
        if self.count > MAX_ROUNDS {
            return Err(format!("Count cannot exceed {} (resource limit)", MAX_ROUNDS));
        }

        if self.timeout <= 0.0 {
            return Err("Timeout must be positive".into());
        }

        if self.hop_sleep < 0.0 {
            return Err("Hop sleep cannot be negative".into());
        }

        if self.max_ttl < 2 {
            return Err("Max TTL must be at least 2".into());
        }
        // Upper bound to prevent resource exhaustion
        const MAX_SAFE_TTL: u8 = 64;
        if self.max_ttl > MAX_SAFE_TTL {
            return Err(format!("Max TTL cannot exceed {}", MAX_SAFE_TTL));
        }

        if self.ring_size == 0 {
            return Err("Ring size must be at least 1".into());
        }
        const MAX_RING_SIZE: usize = 1000;
        if self.ring_size > MAX_RING_SIZE {
            return Err(format!("Ring size cannot exceed {}", MAX_RING_SIZE));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(target: &str) -> Args {
        Args::parse_from(["hopstat", target])
    }

    #[test]
    fn test_defaults_pass_validation() {
        let args = args("192.0.2.1");
        assert!(args.validate().is_ok());
        assert_eq!(args.count, 3);
        assert_eq!(args.max_ttl, 30);
        assert_eq!(args.ring_size, 10);
        assert!(!args.no_dns);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut bad = args("192.0.2.1");
        bad.count = 0;
        assert!(bad.validate().is_err());

        let mut bad = args("192.0.2.1");
        bad.timeout = 0.0;
        assert!(bad.validate().is_err());

        let mut bad = args("192.0.2.1");
        bad.max_ttl = 1;
        assert!(bad.validate().is_err());

        let mut bad = args("192.0.2.1");
        bad.ring_size = 0;
        assert!(bad.validate().is_err());

        let mut bad = args("192.0.2.1");
        bad.report = true;
        bad.csv = true;
        assert!(bad.validate().is_err());
    }
}
