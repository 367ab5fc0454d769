use std::net::IpAddr;

use anyhow::Result;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::Resolver;

/// Reverse-resolution collaborator.
///
/// Returns the candidate names for an address, best first. Errors and empty
/// results are absorbed by the caller, which falls back to showing the raw
/// address.
pub trait ReverseResolver: Send + Sync {
    fn lookup(&self, addr: &str) -> Result<Vec<String>>;
}

/// PTR lookups over the system resolver configuration.
pub struct SystemResolver {
    resolver: Resolver,
}

impl SystemResolver {
    pub fn new() -> Result<Self> {
        let resolver = Resolver::new(ResolverConfig::default(), ResolverOpts::default())?;
        Ok(Self { resolver })
    }
}

impl ReverseResolver for SystemResolver {
    fn lookup(&self, addr: &str) -> Result<Vec<String>> {
        let ip: IpAddr = addr.parse()?;
        let names = self
            .resolver
            .reverse_lookup(ip)?
            .iter()
            .map(|name| {
                let s = name.to_string();
                // Remove trailing dot
                s.trim_end_matches('.').to_string()
            })
            .collect();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_address_input_is_an_error() {
        let resolver = SystemResolver::new().expect("system resolver");
        assert!(resolver.lookup("not-an-address").is_err());
    }
}
