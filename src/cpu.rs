//! `/proc/stat` CPU sampler, run on its own OS thread for the life of the
//! load run (`cpu_stat_thread` in the original tool).

use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CpuStats {
    pub(crate) max: f64,
    pub(crate) min: f64,
    pub(crate) avg: f64,
}

/// Reads the aggregate `cpu` line of `/proc/stat` and returns
/// `(busy, total)` jiffies.
fn read_cpu_jiffies() -> io::Result<(u64, u64)> {
    let contents = fs::read_to_string("/proc/stat")?;
    let line = contents
        .lines()
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "/proc/stat was empty"))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(4)
        .map(|f| f.parse().unwrap_or(0))
        .collect();
    if fields.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "unexpected /proc/stat format"));
    }
    let (user, nice, system, idle) = (fields[0], fields[1], fields[2], fields[3]);
    Ok((user + nice + system, user + nice + system + idle))
}

fn load_fraction() -> Option<f64> {
    let (busy_a, total_a) = read_cpu_jiffies().ok()?;
    thread::sleep(Duration::from_secs(1));
    let (busy_b, total_b) = read_cpu_jiffies().ok()?;
    let total_delta = total_b.checked_sub(total_a)?;
    if total_delta == 0 {
        return None;
    }
    Some((busy_b.saturating_sub(busy_a)) as f64 / total_delta as f64)
}

/// Samples system-wide CPU utilization once per second until `stop` is set,
/// returning the observed max/min/avg as percentages. Intended to run on a
/// dedicated `std::thread` for the whole run, started alongside the worker
/// threads and joined after they finish.
pub(crate) fn run(stop: Arc<AtomicBool>) -> CpuStats {
    let Some(first) = load_fraction() else {
        tracing::warn!("don't know how to read /proc/stat on this system");
        return CpuStats::default();
    };

    let mut max = first;
    let mut min = first;
    let mut total = first;
    let mut count = 1u64;

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let Some(load) = load_fraction() else { continue };
        if stop.load(Ordering::Relaxed) {
            break;
        }
        max = max.max(load);
        min = min.min(load);
        total += load;
        count += 1;
    }

    let stats = CpuStats { max: max * 100.0, min: min * 100.0, avg: total * 100.0 / count as f64 };
    if stats.max > 95.0 {
        tracing::warn!(max_cpu = stats.max, "detected cpu usage above 95%");
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zeroed() {
        let stats = CpuStats::default();
        assert_eq!(stats.max, 0.0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.avg, 0.0);
    }
}
