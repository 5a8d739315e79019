// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identity of the local process, stamped on every announcement and log record.

use std::env;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub host_name: String,
    pub process_id: u32,
    pub process_name: String,
    pub unit_name: String,
}

impl ProcessIdentity {
    /// Identity of the running process. The unit name defaults to the process name.
    #[must_use]
    pub fn current(unit_name: Option<&str>, host_name: Option<&str>) -> Self {
        let process_name = process_name();
        Self {
            host_name: host_name
                .filter(|name| !name.is_empty())
                .map_or_else(get_hostname, str::to_string),
            process_id: std::process::id(),
            unit_name: unit_name
                .filter(|name| !name.is_empty())
                .map_or_else(|| process_name.clone(), str::to_string),
            process_name,
        }
    }
}

/// Name this host announces itself under: `HOSTNAME` if set, else the kernel's hostname,
/// else `"unknown"`.
#[must_use]
pub fn get_hostname() -> String {
    resolve_hostname(env::var("HOSTNAME").ok(), system_hostname)
}

fn resolve_hostname(from_env: Option<String>, system: impl FnOnce() -> Option<String>) -> String {
    from_env
        .filter(|name| !name.is_empty())
        .or_else(system)
        .unwrap_or_else(|| {
            warn!("Could not determine hostname, using 'unknown'");
            "unknown".to_string()
        })
}

#[cfg(unix)]
fn system_hostname() -> Option<String> {
    nix::unistd::gethostname()
        .map_err(|e| warn!("gethostname failed: {}", e))
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
}

#[cfg(not(unix))]
fn system_hostname() -> Option<String> {
    None
}

fn process_name() -> String {
    env::current_exe()
        .ok()
        .and_then(|path| {
            path.file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_hostname_not_empty() {
        assert!(!get_hostname().is_empty());
    }

    #[test]
    fn test_hostname_sources_in_order() {
        let system = || Some("kernel-name".to_string());
        assert_eq!(resolve_hostname(Some("env-name".to_string()), system), "env-name");
        assert_eq!(resolve_hostname(Some(String::new()), system), "kernel-name");
        assert_eq!(resolve_hostname(None, system), "kernel-name");
        assert_eq!(resolve_hostname(None, || None), "unknown");
    }

    #[test]
    fn test_current_identity() {
        let identity = ProcessIdentity::current(None, None);
        assert_eq!(identity.process_id, std::process::id());
        assert!(!identity.process_name.is_empty());
        assert_eq!(identity.unit_name, identity.process_name);
    }

    #[test]
    fn test_overrides() {
        let identity = ProcessIdentity::current(Some("calculator"), Some("host-a"));
        assert_eq!(identity.unit_name, "calculator");
        assert_eq!(identity.host_name, "host-a");

        // empty overrides count as unset
        let identity = ProcessIdentity::current(Some(""), Some(""));
        assert_eq!(identity.unit_name, identity.process_name);
        assert!(!identity.host_name.is_empty());
    }
}
