use std::path::Path;

use anyhow::Result;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::orchestrator::ProcessStatus;

use super::use_color;

pub async fn run(home: Option<&Path>, json: bool) -> Result<()> {
    let orch = super::open(home)?;
    let processes = orch.snapshot().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&processes)?);
        return Ok(());
    }
    if processes.is_empty() {
        println!("No processes registered.");
        println!("Run `procrig run <name> --command <cmd> --directory <dir>` to start one.");
        return Ok(());
    }
    print_table(&processes, use_color());
    Ok(())
}

fn print_table(processes: &[ProcessStatus], use_color: bool) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name").set_alignment(CellAlignment::Left),
        Cell::new("PID").set_alignment(CellAlignment::Right),
        Cell::new("Status").set_alignment(CellAlignment::Center),
        Cell::new("Ports").set_alignment(CellAlignment::Left),
        Cell::new("Memory").set_alignment(CellAlignment::Right),
        Cell::new("Uptime").set_alignment(CellAlignment::Left),
        Cell::new("Directory").set_alignment(CellAlignment::Left),
    ]);

    for p in processes {
        let status = status_label(p);
        let status_text = if use_color {
            match status {
                "running" => format!("{} {}", "\u{25cf}".green(), "running".green()),
                "stopped" => format!("{} {}", "\u{25cf}".dimmed(), "stopped".dimmed()),
                other => format!("{} {}", "\u{25cf}".red(), other.red()),
            }
        } else {
            format!("\u{25cf} {}", status)
        };
        let ports = if p.ports.is_empty() {
            "-".to_string()
        } else {
            p.ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let pid = if p.pid == 0 {
            "-".to_string()
        } else {
            p.pid.to_string()
        };

        table.add_row(vec![
            Cell::new(&p.name),
            Cell::new(pid),
            Cell::new(&status_text),
            Cell::new(ports),
            Cell::new(p.memory_kb.map(format_memory).unwrap_or_else(|| "-".into())),
            Cell::new(p.uptime.as_deref().unwrap_or("-")),
            Cell::new(p.workdir.display()),
        ]);
    }

    for line in table.to_string().lines() {
        println!("  {}", line);
    }
}

/// `stopped` for PID 0, `exited` for a process that died on its own.
fn status_label(p: &ProcessStatus) -> &'static str {
    if p.running {
        "running"
    } else if p.pid == 0 {
        "stopped"
    } else {
        "exited"
    }
}

fn format_memory(kb: u64) -> String {
    if kb >= 1024 * 1024 {
        format!("{:.1} GiB", kb as f64 / (1024.0 * 1024.0))
    } else if kb >= 1024 {
        format!("{:.1} MiB", kb as f64 / 1024.0)
    } else {
        format!("{} KiB", kb)
    }
}
