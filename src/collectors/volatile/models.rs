use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Host identity at capture time
#[derive(Debug, Serialize, Deserialize)]
pub struct HostIdentity {
    pub hostname: Option<String>,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub boot_time: u64,
    pub uptime_secs: u64,
    pub captured_at: DateTime<Utc>,
    pub cpu: CpuSummary,
}

/// First CPU brand and speed, plus the logical count
#[derive(Debug, Serialize, Deserialize)]
pub struct CpuSummary {
    pub count: usize,
    pub brand: Option<String>,
    pub frequency_mhz: u64,
}

/// One row of the process list
#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub pid: u32,
    pub name: String,
    pub cmd: Vec<String>,
    pub exe: Option<String>,
    pub status: String,
    pub start_time: u64,
    pub resident_bytes: u64,
    pub parent_pid: Option<u32>,
}

/// Network interface counters
#[derive(Debug, Serialize, Deserialize)]
pub struct InterfaceCounters {
    pub name: String,
    pub received_bytes: u64,
    pub transmitted_bytes: u64,
    pub received_packets: u64,
    pub transmitted_packets: u64,
}

/// Physical memory and swap, in bytes
#[derive(Debug, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub physical_total: u64,
    pub physical_used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

/// A mounted volume
#[derive(Debug, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    pub mount_point: Option<String>,
    pub capacity_bytes: u64,
    pub free_bytes: u64,
    pub filesystem: Option<String>,
    pub is_removable: bool,
}
