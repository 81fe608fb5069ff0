//! Host sampler used by the agent's poll task.
//!
//! Each poll produces two sets:
//!
//! - [`HostCollector::collect`] — the runtime set: allocator, own-process and
//!   system statistics, a per-poll `RandomValue` gauge, and the `PollCount`
//!   counter. Always at least 28 gauges plus the counter.
//! - [`HostCollector::collect_os`] — the OS set: `TotalMemory`, `FreeMemory`
//!   and one `CPUutilizationN` gauge per logical CPU. This set is allowed to
//!   fail; the caller forwards the runtime set alone and logs.

use sysinfo::System;
use tracing::debug;

use crate::error::ModelError;
use crate::metric::Metric;
use crate::runtime_alloc;

/// Samples the host on demand. Owned by a single poll task; refreshing
/// `sysinfo` state needs exclusive access anyway.
pub struct HostCollector {
    sys: System,
    poll_count: i64,
}

impl HostCollector {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        // First CPU usage reading is meaningless without a prior refresh.
        sys.refresh_all();
        Self { sys, poll_count: 0 }
    }

    /// Number of polls taken so far.
    pub fn poll_count(&self) -> i64 {
        self.poll_count
    }

    /// Sample the runtime set. Increments `PollCount`.
    pub fn collect(&mut self) -> Vec<Metric> {
        self.poll_count += 1;
        self.sys.refresh_all();

        let alloc = runtime_alloc::snapshot();
        let load = System::load_average();

        let mut metrics = Vec::with_capacity(32);

        metrics.push(Metric::gauge(
            "HeapAllocatedBytes",
            alloc.allocated_bytes as f64,
        ));
        metrics.push(Metric::gauge("HeapFreedBytes", alloc.freed_bytes as f64));
        metrics.push(Metric::gauge("HeapLiveBytes", alloc.live_bytes as f64));
        metrics.push(Metric::gauge(
            "HeapPeakBytes",
            alloc.peak_live_bytes as f64,
        ));
        metrics.push(Metric::gauge("HeapLiveObjects", alloc.live_objects as f64));
        metrics.push(Metric::gauge("AllocCalls", alloc.alloc_calls as f64));
        metrics.push(Metric::gauge("FreeCalls", alloc.free_calls as f64));
        metrics.push(Metric::gauge("ReallocCalls", alloc.realloc_calls as f64));
        metrics.push(Metric::gauge(
            "LargestAllocBytes",
            alloc.largest_alloc as f64,
        ));

        let (resident, virt, cpu, run_time, disk) = match sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| self.sys.process(pid))
        {
            Some(proc) => (
                proc.memory() as f64,
                proc.virtual_memory() as f64,
                proc.cpu_usage() as f64,
                proc.run_time() as f64,
                proc.disk_usage(),
            ),
            None => {
                debug!("own process not visible to sampler, reporting zeros");
                (0.0, 0.0, 0.0, 0.0, Default::default())
            }
        };
        metrics.push(Metric::gauge("ProcessResidentMemory", resident));
        metrics.push(Metric::gauge("ProcessVirtualMemory", virt));
        metrics.push(Metric::gauge("ProcessCpuUtilization", cpu));
        metrics.push(Metric::gauge("ProcessRunTime", run_time));
        metrics.push(Metric::gauge("DiskReadBytes", disk.read_bytes as f64));
        metrics.push(Metric::gauge("DiskWrittenBytes", disk.written_bytes as f64));
        metrics.push(Metric::gauge(
            "DiskReadBytesTotal",
            disk.total_read_bytes as f64,
        ));
        metrics.push(Metric::gauge(
            "DiskWrittenBytesTotal",
            disk.total_written_bytes as f64,
        ));

        metrics.push(Metric::gauge("UsedMemory", self.sys.used_memory() as f64));
        metrics.push(Metric::gauge(
            "AvailableMemory",
            self.sys.available_memory() as f64,
        ));
        metrics.push(Metric::gauge("TotalSwap", self.sys.total_swap() as f64));
        metrics.push(Metric::gauge("FreeSwap", self.sys.free_swap() as f64));
        metrics.push(Metric::gauge("UsedSwap", self.sys.used_swap() as f64));
        metrics.push(Metric::gauge("SystemUptime", System::uptime() as f64));
        metrics.push(Metric::gauge("LoadAverage1", load.one));
        metrics.push(Metric::gauge("LoadAverage5", load.five));
        metrics.push(Metric::gauge("LoadAverage15", load.fifteen));
        metrics.push(Metric::gauge("CpuCount", self.sys.cpus().len() as f64));

        metrics.push(Metric::gauge("RandomValue", rand::random::<f64>()));
        metrics.push(Metric::counter("PollCount", self.poll_count));

        metrics
    }

    /// Sample the OS set: total/free memory and per-CPU utilization.
    pub fn collect_os(&mut self) -> Result<Vec<Metric>, ModelError> {
        self.sys.refresh_memory();
        self.sys.refresh_cpu_usage();

        let cpus = self.sys.cpus();
        if cpus.is_empty() {
            return Err(ModelError::Sampling("no CPUs reported".into()));
        }

        let mut metrics = Vec::with_capacity(2 + cpus.len());
        metrics.push(Metric::gauge("TotalMemory", self.sys.total_memory() as f64));
        metrics.push(Metric::gauge("FreeMemory", self.sys.free_memory() as f64));
        for (i, cpu) in cpus.iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                cpu.cpu_usage() as f64,
            ));
        }

        Ok(metrics)
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::{MetricKind, MetricValue};

    #[test]
    fn runtime_set_has_expected_shape() {
        let mut collector = HostCollector::new();
        let metrics = collector.collect();

        let gauges = metrics
            .iter()
            .filter(|m| m.kind() == MetricKind::Gauge)
            .count();
        assert!(gauges >= 28, "expected at least 28 gauges, got {gauges}");

        let poll = metrics
            .iter()
            .find(|m| m.name == "PollCount")
            .expect("PollCount present");
        assert_eq!(poll.value, MetricValue::Counter(1));

        assert!(metrics.iter().any(|m| m.name == "RandomValue"));
    }

    #[test]
    fn poll_count_tracks_polls() {
        let mut collector = HostCollector::new();
        collector.collect();
        collector.collect();
        let metrics = collector.collect();

        let poll = metrics.iter().find(|m| m.name == "PollCount").unwrap();
        assert_eq!(poll.value, MetricValue::Counter(3));
    }

    #[test]
    fn os_set_names_cpus_from_one() {
        let mut collector = HostCollector::new();
        let metrics = collector.collect_os().unwrap();

        assert!(metrics.iter().any(|m| m.name == "TotalMemory"));
        assert!(metrics.iter().any(|m| m.name == "FreeMemory"));
        assert!(metrics.iter().any(|m| m.name == "CPUutilization1"));
        assert!(!metrics.iter().any(|m| m.name == "CPUutilization0"));
    }
}
