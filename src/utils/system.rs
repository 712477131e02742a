// src/utils/system.rs: System functions

use std::time::Duration;

use log::{debug, warn};
use sysinfo::{CpuRefreshKind, RefreshKind, System};
use tokio::time::sleep;

/// Determines the default worker budget: the physical core count, trimmed by
/// one core when the machine is already busy.
///
/// # Arguments
///
/// * `requested` - Explicit `--jobs` / config value, used as-is when set.
///
/// # Returns
///
/// Number of tasks allowed to run at once (at least 1)
pub async fn detect_jobs(requested: Option<usize>) -> usize {
    if let Some(jobs) = requested {
        return jobs.max(1);
    }

    let refresh_kind = RefreshKind::nothing().with_cpu(CpuRefreshKind::nothing().with_cpu_usage());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_cpu_usage();
    sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_millis(100))).await;
    system.refresh_cpu_usage();

    let physical_cores = System::physical_core_count().unwrap_or_else(|| {
        warn!("Could not detect physical core count; running one task at a time");
        1
    });
    let cpu_load = system.global_cpu_usage();
    debug!("Detected {} physical cores at {:.1}% load", physical_cores, cpu_load);

    compute_jobs(physical_cores, cpu_load)
}

pub fn compute_jobs(physical_cores: usize, cpu_load: f32) -> usize {
    if cpu_load > 50.0 && physical_cores > 1 {
        physical_cores - 1
    } else {
        physical_cores.max(1)
    }
}
