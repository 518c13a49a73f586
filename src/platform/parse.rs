//! Parsers for the text the OS hands back about processes and sockets.
//!
//! Kept free of I/O so every platform's format can be tested anywhere.

use std::sync::LazyLock;

use regex::Regex;

use super::ProcessEntry;

static PS_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s+(\d+)\s+(\d+)\s+(.*?)\s*$").expect("ps regex must compile")
});

/// Parse `ps -A -o pid= -o ppid= -o rss= -o args=` output.
pub fn parse_ps(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let caps = PS_LINE_RE.captures(line)?;
            Some(ProcessEntry {
                pid: caps[1].parse().ok()?,
                ppid: caps[2].parse().ok()?,
                memory_kb: caps[3].parse().unwrap_or(0),
                command: caps[4].to_string(),
            })
        })
        .collect()
}

/// TCP socket state value for LISTEN in `/proc/net/tcp`.
pub const PROC_TCP_LISTEN: &str = "0A";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcTcpSocket {
    pub local_port: u16,
    pub state: String,
    pub inode: u64,
}

/// Parse `/proc/net/tcp` or `/proc/net/tcp6`.
pub fn parse_proc_net_tcp(content: &str) -> Vec<ProcTcpSocket> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 {
                return None;
            }
            let port_hex = fields[1].rsplit(':').next()?;
            Some(ProcTcpSocket {
                local_port: u16::from_str_radix(port_hex, 16).ok()?,
                state: fields[3].to_string(),
                inode: fields[9].parse().ok()?,
            })
        })
        .collect()
}

/// Extract the port from an address like `*:3000`, `127.0.0.1:3000`,
/// `[::1]:3000` or `0.0.0.0:3000`. Matching is numeric, so `:3556` never
/// matches `:35560`.
pub fn port_of_addr(addr: &str) -> Option<u16> {
    addr.rsplit(':').next()?.trim().parse().ok()
}

/// Parse `lsof -F pn` field output into `(pid, local_port)` pairs.
///
/// Name fields for connections look like `n127.0.0.1:3000->10.0.0.2:51234`;
/// only the local half is considered.
pub fn parse_lsof_fields(output: &str) -> Vec<(u32, u16)> {
    let mut out = Vec::new();
    let mut current_pid: Option<u32> = None;
    for line in output.lines() {
        if let Some(pid) = line.strip_prefix('p') {
            current_pid = pid.trim().parse().ok();
        } else if let Some(name) = line.strip_prefix('n') {
            let local = name.split("->").next().unwrap_or(name);
            if let (Some(pid), Some(port)) = (current_pid, port_of_addr(local)) {
                out.push((pid, port));
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetstatRow {
    pub local_port: u16,
    pub state: String,
    pub pid: u32,
}

/// Parse Windows `netstat -ano -p TCP` output.
pub fn parse_netstat(output: &str) -> Vec<NetstatRow> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 5 || !fields[0].eq_ignore_ascii_case("TCP") {
                return None;
            }
            Some(NetstatRow {
                local_port: port_of_addr(fields[1])?,
                state: fields[3].to_string(),
                pid: fields[4].parse().ok()?,
            })
        })
        .collect()
}
