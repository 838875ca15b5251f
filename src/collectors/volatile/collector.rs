use std::fs;
use std::path::Path;

use anyhow::{Context as AnyhowContext, Result};
use chrono::Utc;
use log::debug;
use sysinfo::{
    CpuExt, DiskExt, NetworkExt, NetworksExt, PidExt, ProcessExt, ProcessStatus, System, SystemExt,
};

use crate::collectors::volatile::models::*;

/// Point-in-time reader of live host state backed by `sysinfo`
pub struct HostSnapshotter {
    system: System,
}

impl HostSnapshotter {
    /// Create a snapshotter with an initial full refresh
    pub fn new() -> Self {
        Self { system: System::new_all() }
    }

    /// Host identity, OS and CPU facts
    pub fn system_info(&mut self) -> HostIdentity {
        debug!("Collecting system information");
        self.system.refresh_cpu();

        let cpu = CpuSummary {
            count: self.system.cpus().len(),
            brand: self.system.cpus().first().map(|cpu| cpu.brand().to_string()),
            frequency_mhz: self.system.cpus().first().map_or(0, |cpu| cpu.frequency()),
        };

        HostIdentity {
            hostname: self.system.host_name(),
            os_name: self.system.name(),
            os_version: self.system.os_version(),
            kernel_version: self.system.kernel_version(),
            boot_time: self.system.boot_time(),
            uptime_secs: self.system.uptime(),
            captured_at: Utc::now(),
            cpu,
        }
    }

    /// Running processes, sorted by pid
    pub fn processes(&mut self) -> Vec<ProcessEntry> {
        debug!("Collecting process information");
        self.system.refresh_processes();

        let mut processes: Vec<ProcessEntry> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let status = match process.status() {
                    ProcessStatus::Run => "Running",
                    ProcessStatus::Sleep => "Sleeping",
                    ProcessStatus::Stop => "Stopped",
                    ProcessStatus::Zombie => "Zombie",
                    ProcessStatus::Idle => "Idle",
                    _ => "Unknown",
                };

                ProcessEntry {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    cmd: process.cmd().to_vec(),
                    exe: Some(process.exe().to_string_lossy().to_string()),
                    status: status.to_string(),
                    start_time: process.start_time(),
                    resident_bytes: process.memory(),
                    parent_pid: process.parent().map(|p| p.as_u32()),
                }
            })
            .collect();

        processes.sort_by_key(|p| p.pid);
        processes
    }

    /// Interface counters, sorted by interface name
    pub fn network_interfaces(&mut self) -> Vec<InterfaceCounters> {
        debug!("Collecting network interfaces");
        self.system.refresh_networks_list();
        self.system.refresh_networks();

        let mut interfaces: Vec<InterfaceCounters> = self
            .system
            .networks()
            .iter()
            .map(|(name, data)| InterfaceCounters {
                name: name.to_string(),
                received_bytes: data.total_received(),
                transmitted_bytes: data.total_transmitted(),
                received_packets: data.total_packets_received(),
                transmitted_packets: data.total_packets_transmitted(),
            })
            .collect();

        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        interfaces
    }

    /// Physical memory and swap usage
    pub fn memory(&mut self) -> MemoryUsage {
        debug!("Collecting memory information");
        self.system.refresh_memory();

        MemoryUsage {
            physical_total: self.system.total_memory(),
            physical_used: self.system.used_memory(),
            swap_total: self.system.total_swap(),
            swap_used: self.system.used_swap(),
        }
    }

    /// Mounted volumes
    pub fn disks(&mut self) -> Vec<VolumeInfo> {
        debug!("Collecting disk information");
        self.system.refresh_disks_list();

        self.system
            .disks()
            .iter()
            .map(|disk| VolumeInfo {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: Some(disk.mount_point().to_string_lossy().to_string()),
                capacity_bytes: disk.total_space(),
                free_bytes: disk.available_space(),
                filesystem: std::str::from_utf8(disk.file_system()).ok().map(|s| s.to_string()),
                is_removable: disk.is_removable(),
            })
            .collect()
    }
}

impl Default for HostSnapshotter {
    fn default() -> Self {
        Self::new()
    }
}

/// Write a snapshot as pretty JSON and make sure it reached the disk
pub fn save_to_json<T: serde::Serialize>(data: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create directory: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(data).context("Failed to serialize data to JSON")?;

    let mut file = fs::File::create(path)
        .context(format!("Failed to create file: {}", path.display()))?;
    std::io::Write::write_all(&mut file, json.as_bytes())
        .context(format!("Failed to write data to file: {}", path.display()))?;
    file.sync_all()
        .context(format!("Failed to sync file: {}", path.display()))?;

    debug!("Saved data to {}", path.display());
    Ok(())
}
