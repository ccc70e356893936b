//! Host resource usage probes

use std::fs;
use std::path::PathBuf;

use serde::Serialize;

/// Memory and storage usage, as percentages
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub memory_percent: Option<f64>,
    pub storage_percent: Option<f64>,
}

/// Reports host resource usage to the health aggregator
///
/// An `Err` degrades the storage component to unknown instead of failing the
/// whole health check.
pub trait ResourceProbe: Send + Sync {
    fn usage(&self) -> Result<ResourceUsage, String>;
}

/// Reads memory usage from a Linux `/proc/meminfo` style file
#[derive(Debug, Clone)]
pub struct MeminfoProbe {
    path: PathBuf,
}

impl Default for MeminfoProbe {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

impl MeminfoProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ResourceProbe for MeminfoProbe {
    fn usage(&self) -> Result<ResourceUsage, String> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| format!("cannot read {}: {}", self.path.display(), e))?;
        Ok(ResourceUsage {
            memory_percent: Some(parse_meminfo(&content)?),
            storage_percent: None,
        })
    }
}

fn parse_meminfo(content: &str) -> Result<f64, String> {
    let field = |name: &str| -> Option<f64> {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name)?.strip_prefix(':'))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse::<f64>().ok())
    };

    let total = field("MemTotal").ok_or("MemTotal missing")?;
    let available = field("MemAvailable").ok_or("MemAvailable missing")?;
    if total <= 0.0 {
        return Err("MemTotal is zero".to_string());
    }
    Ok(((total - available) / total * 100.0).clamp(0.0, 100.0))
}
