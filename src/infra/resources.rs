//! Host resource sampling
//!
//! The admission picker throttles on two live numbers: the CPU ratio
//! (1-minute load average over core count) and available memory. The
//! parsers are separated from the /proc plumbing so they can be tested
//! on fixed input.

use std::sync::Mutex;

/// Live host resource numbers
pub trait ResourceSampler: Send + Sync {
    /// Recent CPU usage relative to core count; 1.0 means fully busy
    fn cpu_ratio(&self) -> f64;

    /// Memory currently available for new work, in bytes
    fn memory_available(&self) -> u64;
}

/// Samples the running host via /proc
#[derive(Debug, Default)]
pub struct SystemResources;

impl ResourceSampler for SystemResources {
    fn cpu_ratio(&self) -> f64 {
        let loadavg = match std::fs::read_to_string("/proc/loadavg") {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Cannot read /proc/loadavg: {e}");
                return 1.0;
            }
        };
        match parse_loadavg(&loadavg) {
            Some(load1) => load1 / num_cpus::get() as f64,
            None => 1.0,
        }
    }

    fn memory_available(&self) -> u64 {
        let meminfo = match std::fs::read_to_string("/proc/meminfo") {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Cannot read /proc/meminfo: {e}");
                return u64::MAX;
            }
        };
        parse_meminfo_available(&meminfo).unwrap_or(u64::MAX)
    }
}

/// First (1-minute) load average field
pub fn parse_loadavg(content: &str) -> Option<f64> {
    content.split_whitespace().next()?.parse().ok()
}

/// MemAvailable in bytes
pub fn parse_meminfo_available(content: &str) -> Option<u64> {
    for line in content.lines() {
        let Some(rest) = line.strip_prefix("MemAvailable:") else {
            continue;
        };
        let kb: u64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
        return Some(kb * 1024);
    }
    None
}

/// Fixed numbers for tests and dry runs
#[derive(Debug)]
pub struct StaticResources {
    state: Mutex<(f64, u64)>,
}

impl StaticResources {
    pub fn new(cpu_ratio: f64, memory_available: u64) -> Self {
        Self {
            state: Mutex::new((cpu_ratio, memory_available)),
        }
    }

    /// Replace the reported numbers
    pub fn set(&self, cpu_ratio: f64, memory_available: u64) {
        *self.state.lock().unwrap() = (cpu_ratio, memory_available);
    }
}

impl ResourceSampler for StaticResources {
    fn cpu_ratio(&self) -> f64 {
        self.state.lock().unwrap().0
    }

    fn memory_available(&self) -> u64 {
        self.state.lock().unwrap().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_loadavg() {
        assert_eq!(parse_loadavg("0.52 0.58 0.59 1/1262 12345\n"), Some(0.52));
        assert_eq!(parse_loadavg(""), None);
        assert_eq!(parse_loadavg("not-a-number"), None);
    }

    #[test]
    fn test_parse_meminfo_available() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    8192000 kB\n";
        assert_eq!(
            parse_meminfo_available(meminfo),
            Some(8192000 * 1024)
        );
        assert_eq!(parse_meminfo_available("MemTotal: 1 kB\n"), None);
    }

    #[test]
    fn test_static_resources() {
        let res = StaticResources::new(0.5, 1024);
        assert_eq!(res.cpu_ratio(), 0.5);
        assert_eq!(res.memory_available(), 1024);
        res.set(2.0, 0);
        assert_eq!(res.memory_available(), 0);
    }
}
