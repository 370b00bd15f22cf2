//! Utility helpers for the exporter.

use std::fs;
use std::process;

/// Placeholder used when the host name cannot be determined.
pub const UNKNOWN_HOST: &str = "unknown";

/// Returns the machine host name.
///
/// Tries the kernel's view first, then the `hostname` command, and falls back
/// to `UNKNOWN_HOST`.
pub fn hostname() -> String {
    kernel_hostname()
        .or_else(command_hostname)
        .unwrap_or_else(|| UNKNOWN_HOST.to_string())
}

fn kernel_hostname() -> Option<String> {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn command_hostname() -> Option<String> {
    process::Command::new("hostname")
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}
