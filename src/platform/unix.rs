use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::debug;

use super::parse::{parse_lsof_fields, parse_ps};
use super::{run_query, ProcessEntry, ProcessInspector, Signaller};

pub const SHELL_NAME: &str = "sh -c";

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

pub fn configure_detached(cmd: &mut Command) {
    cmd.process_group(0);
}

/// POSIX process/socket inspection: `ps`, `/proc` on Linux, `lsof` elsewhere.
pub struct NativePlatform {
    query_timeout: Duration,
}

impl NativePlatform {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    async fn lsof(&self, args: &[&str]) -> Vec<(u32, u16)> {
        let mut cmd = Command::new("lsof");
        cmd.args(args);
        match run_query(cmd, self.query_timeout).await {
            Some(out) => parse_lsof_fields(&out),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProcessInspector for NativePlatform {
    async fn exists(&self, pid: u32) -> bool {
        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw <= 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => !is_zombie(pid, self.query_timeout).await,
            Err(_) => false,
        }
    }

    async fn processes(&self) -> Vec<ProcessEntry> {
        let mut cmd = Command::new("ps");
        cmd.args(["-A", "-o", "pid=", "-o", "ppid=", "-o", "rss=", "-o", "args="]);
        match run_query(cmd, self.query_timeout).await {
            Some(out) => parse_ps(&out),
            None => Vec::new(),
        }
    }

    async fn listening_ports(&self, pid: u32) -> Vec<u16> {
        #[cfg(target_os = "linux")]
        {
            procfs::listening_ports(pid)
        }
        #[cfg(not(target_os = "linux"))]
        {
            let pid_arg = pid.to_string();
            let mut ports: Vec<u16> = self
                .lsof(&["-nP", "-a", "-p", &pid_arg, "-iTCP", "-sTCP:LISTEN", "-Fpn"])
                .await
                .into_iter()
                .filter(|(owner, _)| *owner == pid)
                .map(|(_, port)| port)
                .collect();
            ports.sort_unstable();
            ports.dedup();
            ports
        }
    }

    async fn pids_on_port(&self, port: u16) -> Vec<u32> {
        #[cfg(target_os = "linux")]
        {
            let pids = procfs::pids_on_port(port);
            if !pids.is_empty() {
                return pids;
            }
        }
        // lsof also sees sockets of other users' processes when permitted.
        let spec = format!("-iTCP:{}", port);
        let mut pids: Vec<u32> = self
            .lsof(&["-nP", &spec, "-Fpn"])
            .await
            .into_iter()
            .filter(|(_, local)| *local == port)
            .map(|(pid, _)| pid)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        pids.sort_unstable();
        pids
    }
}

#[async_trait]
impl Signaller for NativePlatform {
    async fn terminate(&self, pid: u32, force: bool) -> std::io::Result<()> {
        let raw = i32::try_from(pid)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
        if raw <= 0 {
            return Ok(());
        }
        let signal = if force { Signal::SIGKILL } else { Signal::SIGTERM };
        match kill(Pid::from_raw(raw), signal) {
            Ok(()) => {
                debug!(pid, ?signal, "signal sent");
                Ok(())
            }
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(std::io::Error::from_raw_os_error(e as i32)),
        }
    }
}

#[cfg(target_os = "linux")]
async fn is_zombie(pid: u32, _timeout: Duration) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // Format: "pid (comm) S ...". comm may contain spaces/parens.
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
        Err(_) => false,
    }
}

#[cfg(not(target_os = "linux"))]
async fn is_zombie(pid: u32, timeout: Duration) -> bool {
    let mut cmd = Command::new("ps");
    cmd.args(["-o", "stat=", "-p", &pid.to_string()]);
    match run_query(cmd, timeout).await {
        Some(out) => out.trim_start().starts_with('Z'),
        None => false,
    }
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::collections::{HashMap, HashSet};

    use crate::platform::parse::{parse_proc_net_tcp, ProcTcpSocket, PROC_TCP_LISTEN};

    fn tcp_sockets() -> Vec<ProcTcpSocket> {
        ["/proc/net/tcp", "/proc/net/tcp6"]
            .iter()
            .filter_map(|path| std::fs::read_to_string(path).ok())
            .flat_map(|content| parse_proc_net_tcp(&content))
            .collect()
    }

    fn socket_inodes(pid: u32) -> HashSet<u64> {
        let mut inodes = HashSet::new();
        let Ok(fds) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
            return inodes;
        };
        for fd in fds.flatten() {
            if let Ok(link) = std::fs::read_link(fd.path()) {
                let link = link.to_string_lossy();
                if let Some(inode) = link
                    .strip_prefix("socket:[")
                    .and_then(|s| s.strip_suffix(']'))
                    .and_then(|s| s.parse().ok())
                {
                    inodes.insert(inode);
                }
            }
        }
        inodes
    }

    pub fn listening_ports(pid: u32) -> Vec<u16> {
        let owned = socket_inodes(pid);
        if owned.is_empty() {
            return Vec::new();
        }
        let mut ports: Vec<u16> = tcp_sockets()
            .into_iter()
            .filter(|s| s.state == PROC_TCP_LISTEN && owned.contains(&s.inode))
            .map(|s| s.local_port)
            .collect();
        ports.sort_unstable();
        ports.dedup();
        ports
    }

    pub fn pids_on_port(port: u16) -> Vec<u32> {
        let wanted: HashMap<u64, u16> = tcp_sockets()
            .into_iter()
            .filter(|s| s.local_port == port && s.inode != 0)
            .map(|s| (s.inode, s.local_port))
            .collect();
        if wanted.is_empty() {
            return Vec::new();
        }
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return Vec::new();
        };
        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if socket_inodes(pid).iter().any(|inode| wanted.contains_key(inode)) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        pids
    }
}
