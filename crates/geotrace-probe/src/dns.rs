//! Target resolution and reverse DNS.

use geotrace_core::TraceError;
use hickory_resolver::TokioAsyncResolver;
use std::collections::HashMap;
use std::net::IpAddr;
use tracing::trace;

/// DNS resolver shared by all traces.
pub struct Dns {
    resolver: TokioAsyncResolver,
}

impl Dns {
    /// Creates a resolver from the system configuration.
    pub fn from_system_conf() -> Result<Self, TraceError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| TraceError::Internal(format!("Failed to create DNS resolver: {}", e)))?;
        Ok(Self { resolver })
    }

    /// Resolves a hostname or IP literal, preferring IPv4.
    pub async fn resolve_target(&self, target: &str) -> Result<IpAddr, TraceError> {
        if let Some(ip) = literal_ip(target) {
            return Ok(ip);
        }

        let lookup =
            self.resolver
                .lookup_ip(target)
                .await
                .map_err(|e| TraceError::TargetResolution {
                    target: target.to_string(),
                    reason: e.to_string(),
                })?;

        pick_address(lookup.iter()).ok_or_else(|| TraceError::TargetResolution {
            target: target.to_string(),
            reason: "no addresses found".to_string(),
        })
    }

    /// Starts a per-trace reverse lookup cache.
    pub fn reverse_cache(&self) -> ReverseCache<'_> {
        ReverseCache {
            dns: self,
            names: HashMap::new(),
        }
    }

    async fn reverse(&self, ip: IpAddr) -> String {
        match self.resolver.reverse_lookup(ip).await {
            Ok(lookup) => lookup
                .iter()
                .next()
                .map(|name| name.to_string())
                .unwrap_or_default(),
            Err(e) => {
                trace!(%ip, error = %e, "Reverse lookup failed");
                String::new()
            }
        }
    }
}

/// Reverse names seen during one trace; empty means no PTR record.
pub struct ReverseCache<'a> {
    dns: &'a Dns,
    names: HashMap<IpAddr, String>,
}

impl ReverseCache<'_> {
    pub async fn name_of(&mut self, ip: IpAddr) -> String {
        if let Some(name) = self.names.get(&ip) {
            return name.clone();
        }
        let name = self.dns.reverse(ip).await;
        self.names.insert(ip, name.clone());
        name
    }
}

fn literal_ip(target: &str) -> Option<IpAddr> {
    target
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}

fn pick_address(addrs: impl Iterator<Item = IpAddr>) -> Option<IpAddr> {
    let mut fallback = None;
    for ip in addrs {
        if ip.is_ipv4() {
            return Some(ip);
        }
        fallback.get_or_insert(ip);
    }
    fallback
}
