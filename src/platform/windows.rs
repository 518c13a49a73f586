use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use windows_sys::Win32::Foundation::CloseHandle;
use windows_sys::Win32::System::Threading::{
    GetExitCodeProcess, OpenProcess, CREATE_NEW_PROCESS_GROUP, CREATE_NO_WINDOW,
    PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::parse::parse_netstat;
use super::{run_query, ProcessEntry, ProcessInspector, Signaller};

pub const SHELL_NAME: &str = "cmd.exe /C";

const STILL_ACTIVE: u32 = 259;

pub fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd.exe");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn configure_detached(cmd: &mut Command) {
    cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_NO_WINDOW);
}

/// Windows process/socket inspection via CIM (PowerShell), `netstat` and
/// `taskkill`.
pub struct NativePlatform {
    query_timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CimProcess {
    process_id: u32,
    parent_process_id: u32,
    working_set_size: Option<u64>,
    command_line: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CimOutput {
    Many(Vec<CimProcess>),
    One(CimProcess),
}

impl NativePlatform {
    pub fn new(query_timeout: Duration) -> Self {
        Self { query_timeout }
    }

    async fn netstat(&self) -> Vec<super::parse::NetstatRow> {
        let mut cmd = Command::new("netstat");
        cmd.args(["-ano", "-p", "TCP"]);
        match run_query(cmd, self.query_timeout).await {
            Some(out) => parse_netstat(&out),
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProcessInspector for NativePlatform {
    async fn exists(&self, pid: u32) -> bool {
        if pid == 0 {
            return false;
        }
        // SAFETY: the handle is checked for null and closed before returning.
        unsafe {
            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, 0, pid);
            if handle.is_null() {
                return false;
            }
            let mut exit_code: u32 = 0;
            let result = GetExitCodeProcess(handle, &mut exit_code);
            CloseHandle(handle);
            result != 0 && exit_code == STILL_ACTIVE
        }
    }

    async fn processes(&self) -> Vec<ProcessEntry> {
        let mut cmd = Command::new("powershell");
        cmd.args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Get-CimInstance Win32_Process | \
             Select-Object ProcessId,ParentProcessId,WorkingSetSize,CommandLine | \
             ConvertTo-Json -Compress",
        ]);
        let Some(out) = run_query(cmd, self.query_timeout).await else {
            return Vec::new();
        };
        let parsed = match serde_json::from_str::<CimOutput>(out.trim()) {
            Ok(CimOutput::Many(v)) => v,
            Ok(CimOutput::One(p)) => vec![p],
            Err(e) => {
                debug!(error = %e, "unparseable CIM process listing");
                return Vec::new();
            }
        };
        parsed
            .into_iter()
            .map(|p| ProcessEntry {
                pid: p.process_id,
                ppid: p.parent_process_id,
                memory_kb: p.working_set_size.unwrap_or(0) / 1024,
                command: p.command_line.unwrap_or_default(),
            })
            .collect()
    }

    async fn listening_ports(&self, pid: u32) -> Vec<u16> {
        self.netstat()
            .await
            .into_iter()
            .filter(|row| row.pid == pid && row.state.eq_ignore_ascii_case("LISTENING"))
            .map(|row| row.local_port)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    async fn pids_on_port(&self, port: u16) -> Vec<u32> {
        self.netstat()
            .await
            .into_iter()
            .filter(|row| row.local_port == port && row.pid != 0)
            .map(|row| row.pid)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[async_trait]
impl Signaller for NativePlatform {
    async fn terminate(&self, pid: u32, force: bool) -> std::io::Result<()> {
        if pid == 0 {
            return Ok(());
        }
        let mut cmd = Command::new("taskkill");
        cmd.arg("/PID").arg(pid.to_string());
        if force {
            cmd.arg("/F");
        }
        // taskkill fails for already-exited PIDs; that is not an error here.
        let _ = run_query(cmd, self.query_timeout).await;
        Ok(())
    }
}
