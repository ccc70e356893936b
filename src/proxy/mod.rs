//! Egress proxy pool
//!
//! Tracks a set of proxies with health scores, hands out the best one for the
//! next request, and sweeps them periodically with connectivity probes.

mod pool;
mod probe;
mod record;

pub use pool::{HealthCheckSummary, ImportSummary, ProxyPool, ProxyPoolStats};
pub use probe::{HttpProbe, ProbeSettings, ProxyProbe};
pub use record::{ProxyCredentials, ProxyHealthRules, ProxyProtocol, ProxyRecord};
