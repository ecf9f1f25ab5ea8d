//! Local system facts: identity, boot time and disk usage.

use std::path::{Path, PathBuf};

use jetsight_common::{DiskUsage, HostFacts};
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::debug;

/// Environment variables consulted for the login name, in order.
const USER_ENV_VARS: [&str; 4] = ["LOGNAME", "USER", "LNAME", "USERNAME"];

/// Source of facts about the local host.
pub trait HostInfo: Send + Sync {
    fn facts(&self) -> HostFacts;
}

/// [`HostInfo`] backed by `sysinfo` and `hostname`.
pub struct SysinfoHost {
    username: String,
    hostname: String,
    mount_point: PathBuf,
}

impl SysinfoHost {
    /// Resolve identity once and remember the mount point to report.
    pub fn new(mount_point: impl Into<PathBuf>) -> Self {
        let username = resolve_username();
        let hostname = resolve_hostname();
        let mount_point = mount_point.into();

        debug!(
            username = %username,
            hostname = %hostname,
            mount = %mount_point.display(),
            "Resolved host identity"
        );

        Self {
            username,
            hostname,
            mount_point,
        }
    }

    fn disk_usage(&self) -> Option<DiskUsage> {
        let usage = filesystem_usage(&self.mount_point);
        if usage.is_none() {
            debug!(mount = %self.mount_point.display(), "Disk usage unavailable");
        }
        usage
    }
}

impl HostInfo for SysinfoHost {
    fn facts(&self) -> HostFacts {
        HostFacts {
            username: self.username.clone(),
            hostname: self.hostname.clone(),
            boot_time: Some(System::boot_time()),
            disk: self.disk_usage(),
        }
    }
}

/// Usage of the filesystem holding `path`, from `statvfs(3)`.
#[cfg(unix)]
fn filesystem_usage(path: &Path) -> Option<DiskUsage> {
    let stat = match rustix::fs::statvfs(path) {
        Ok(stat) => stat,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "statvfs failed");
            return None;
        }
    };

    Some(DiskUsage::from_blocks(
        stat.f_frsize,
        stat.f_blocks,
        stat.f_bfree,
        stat.f_bavail,
    ))
}

#[cfg(not(unix))]
fn filesystem_usage(_path: &Path) -> Option<DiskUsage> {
    None
}

fn resolve_username() -> String {
    USER_ENV_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|name| !name.is_empty())
        .or_else(process_owner)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Name of the user owning this process.
fn process_owner() -> Option<String> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_user(UpdateKind::OnlyIfNotSet),
    );
    let uid = system.process(pid)?.user_id()?.clone();

    let users = Users::new_with_refreshed_list();
    users.get_user_by_id(&uid).map(|user| user.name().to_string())
}

fn resolve_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
