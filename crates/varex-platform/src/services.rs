//! Introspection provider trait and desktop implementation.

use std::time::Instant;

use serde::Serialize;
use varex_types::error::{Result, VarexError};

// ---------------------------------------------------------------------------
// Provider trait
// ---------------------------------------------------------------------------

/// Memory usage of the current process, in kilobytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    /// Virtual memory size.
    pub vm_size_kb: u64,
    /// Peak virtual memory size.
    pub vm_peak_kb: u64,
    /// Resident set size.
    pub vm_rss_kb: u64,
    /// Peak resident set size.
    pub vm_hwm_kb: u64,
    /// Data segment size.
    pub vm_data_kb: u64,
    /// Main thread stack size.
    pub vm_stk_kb: u64,
}

/// Source of runtime facts about the current process.
pub trait IntrospectionProvider: Send + Sync {
    /// Command-line arguments, program name first.
    fn args(&self) -> Vec<String>;

    fn pid(&self) -> u32;

    /// Seconds since the provider was created.
    fn uptime_secs(&self) -> u64;

    /// Number of OS threads in the process.
    fn thread_count(&self) -> Result<usize>;

    /// Parallelism available to the process.
    fn parallelism(&self) -> Result<usize>;

    fn memory_stats(&self) -> Result<MemoryStats>;

    /// Backtrace of the calling thread.
    fn stack(&self) -> String;
}

// ---------------------------------------------------------------------------
// Desktop implementation
// ---------------------------------------------------------------------------

const PROC_STATUS: &str = "/proc/self/status";

/// Provider backed by `std` and, on Linux, `/proc/self/status`.
pub struct DesktopIntrospection {
    start_time: Instant,
}

impl DesktopIntrospection {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for DesktopIntrospection {
    fn default() -> Self {
        Self::new()
    }
}

impl IntrospectionProvider for DesktopIntrospection {
    fn args(&self) -> Vec<String> {
        std::env::args_os()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn pid(&self) -> u32 {
        std::process::id()
    }

    fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn thread_count(&self) -> Result<usize> {
        let status = read_proc_status()?;
        status_field(&status, "Threads")
            .map(|n| n as usize)
            .ok_or_else(|| VarexError::Platform(format!("no Threads field in {PROC_STATUS}")))
    }

    fn parallelism(&self) -> Result<usize> {
        Ok(std::thread::available_parallelism()?.get())
    }

    fn memory_stats(&self) -> Result<MemoryStats> {
        Ok(parse_memory_stats(&read_proc_status()?))
    }

    fn stack(&self) -> String {
        std::backtrace::Backtrace::force_capture().to_string()
    }
}

fn read_proc_status() -> Result<String> {
    if !cfg!(target_os = "linux") {
        return Err(VarexError::Platform(format!(
            "{PROC_STATUS} is not available on {}",
            std::env::consts::OS
        )));
    }
    Ok(std::fs::read_to_string(PROC_STATUS)?)
}

/// First number of a `Key:   value [unit]` line.
fn status_field(status: &str, key: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        if k != key {
            return None;
        }
        v.split_whitespace().next()?.parse().ok()
    })
}

fn parse_memory_stats(status: &str) -> MemoryStats {
    let field = |key: &str| status_field(status, key).unwrap_or(0);
    MemoryStats {
        vm_size_kb: field("VmSize"),
        vm_peak_kb: field("VmPeak"),
        vm_rss_kb: field("VmRSS"),
        vm_hwm_kb: field("VmHWM"),
        vm_data_kb: field("VmData"),
        vm_stk_kb: field("VmStk"),
    }
}
