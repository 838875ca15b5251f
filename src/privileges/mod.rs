//! Privilege collaborator.
//!
//! Units that declare `requires_privilege` are only prepared when the
//! [`PrivilegeProbe`] handed to the engine reports an elevated process.

#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "macos")]
mod macos;

/// Answers whether the collector runs with elevated privileges
#[cfg_attr(test, mockall::automock)]
pub trait PrivilegeProbe: Send + Sync {
    fn is_elevated(&self) -> bool;
}

/// Probe backed by the host operating system
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPrivileges;

impl PrivilegeProbe for SystemPrivileges {
    fn is_elevated(&self) -> bool {
        is_elevated()
    }
}

/// Probe with a fixed answer, for dry runs and tests
#[derive(Debug, Clone, Copy)]
pub struct StaticPrivileges(pub bool);

impl PrivilegeProbe for StaticPrivileges {
    fn is_elevated(&self) -> bool {
        self.0
    }
}

/// Check if the process is running with elevated privileges
pub fn is_elevated() -> bool {
    #[cfg(target_os = "windows")]
    {
        windows::is_admin()
    }
    #[cfg(target_os = "linux")]
    {
        linux::is_root()
    }
    #[cfg(target_os = "macos")]
    {
        macos::is_root()
    }
    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Get instructions for elevating privileges on the current platform
pub fn get_elevation_instructions() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "Run as Administrator by right-clicking the executable and selecting 'Run as administrator'"
    }
    #[cfg(not(target_os = "windows"))]
    {
        "Run with sudo: 'sudo ./evidence-collector'"
    }
}
