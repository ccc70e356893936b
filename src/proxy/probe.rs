//! Out-of-band proxy connectivity probes

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;

use crate::proxy::ProxyRecord;

/// Checks whether a proxy can carry traffic
///
/// Implementations return the round-trip time on success and a short error
/// description on failure. The pool enforces its own timeout around every
/// probe, so implementations need not.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &ProxyRecord) -> Result<Duration, String>;
}

/// Limits applied to a probe sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Upper bound on a single probe
    pub timeout: Duration,

    /// Number of probes allowed in flight at once
    pub max_concurrent: usize,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            max_concurrent: 10,
        }
    }
}

/// Probes a proxy by fetching a check URL through it
#[derive(Debug, Clone)]
pub struct HttpProbe {
    check_url: String,
    timeout: Duration,
    user_agent: String,
}

impl HttpProbe {
    pub fn new(check_url: impl Into<String>, timeout: Duration, user_agent: impl Into<String>) -> Self {
        Self {
            check_url: check_url.into(),
            timeout,
            user_agent: user_agent.into(),
        }
    }

    fn client_for(&self, proxy: &ProxyRecord) -> Result<Client, String> {
        let egress = proxy.to_reqwest_proxy().map_err(|e| e.to_string())?;
        Client::builder()
            .proxy(egress)
            .user_agent(self.user_agent.clone())
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .build()
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl ProxyProbe for HttpProbe {
    async fn probe(&self, proxy: &ProxyRecord) -> Result<Duration, String> {
        let client = self.client_for(proxy)?;
        let started = Instant::now();

        let response = client
            .get(&self.check_url)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(started.elapsed())
        } else {
            Err(format!("check URL answered HTTP {}", status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyProtocol;

    #[tokio::test]
    async fn test_http_probe_fails_on_dead_proxy() {
        // Nothing listens on port 1
        let proxy = ProxyRecord::new(ProxyProtocol::Http, "127.0.0.1", 1);
        let probe = HttpProbe::new(
            "http://example.com/",
            Duration::from_secs(2),
            "meshhunt-test/1.0",
        );

        let result = probe.probe(&proxy).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_default_settings() {
        let settings = ProbeSettings::default();
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.max_concurrent, 10);
    }
}
