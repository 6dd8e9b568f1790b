//! Host resource sampling shared with [`crate::core::resource_monitor`].
//! The teacher's version of this module also aggregated circuit-breaker
//! metrics and served a dashboard of historical system health; none of
//! that has a counterpart in the work-order control plane (no
//! `/system/metrics`-style endpoint here, and agent invocation failures
//! are tracked by `adapters::agent_runner::circuit_breaker` directly), so
//! only the platform memory sampling survives the trim.

/// Platform-specific memory usage, as a 0-100 percentage of total. Shared
/// with [`crate::core::resource_monitor`], which samples the same value as
/// a 0-1 fraction to gate scheduler admission.
pub(crate) fn read_memory_usage_percent() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
            let mut mem_total = 0u64;
            let mut mem_available = 0u64;

            for line in meminfo.lines() {
                let parts: Vec<&str> = line.split_whitespace().collect();
                if parts.len() >= 2 {
                    match parts[0] {
                        "MemTotal:" => mem_total = parts[1].parse().unwrap_or(0),
                        "MemAvailable:" => mem_available = parts[1].parse().unwrap_or(0),
                        _ => {}
                    }
                }
            }

            if mem_total > 0 {
                let mem_used = mem_total.saturating_sub(mem_available);
                return (mem_used as f64 / mem_total as f64) * 100.0;
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        use std::process::Command;
        if let Ok(output) = Command::new("vm_stat").output() {
            if let Ok(stats) = String::from_utf8(output.stdout) {
                let mut page_size = 4096u64;
                let mut pages_free = 0u64;

                for line in stats.lines() {
                    if line.contains("page size of") {
                        if let Some(size_str) = line.split_whitespace().nth(7) {
                            page_size = size_str.parse().unwrap_or(4096);
                        }
                    } else if line.starts_with("Pages free:") {
                        if let Some(value) = line.split_whitespace().nth(2) {
                            pages_free = value.trim_end_matches('.').parse().unwrap_or(0);
                        }
                    }
                }

                if let Ok(output) = Command::new("sysctl").args(["-n", "hw.memsize"]).output() {
                    if let Ok(total_str) = String::from_utf8(output.stdout) {
                        if let Ok(total_bytes) = total_str.trim().parse::<u64>() {
                            let pages_total = total_bytes / page_size;
                            let pages_used = pages_total.saturating_sub(pages_free);
                            return (pages_used as f64 / pages_total as f64) * 100.0;
                        }
                    }
                }
            }
        }
    }

    45.0
}
