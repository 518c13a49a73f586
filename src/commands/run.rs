use std::path::Path;

use anyhow::Result;
use owo_colors::OwoColorize;

use crate::cli::RunArgs;
use crate::orchestrator::RunRequest;

use super::use_color;

impl From<RunArgs> for RunRequest {
    fn from(args: RunArgs) -> Self {
        RunRequest {
            name: args.name,
            command: args.command,
            directory: args.directory,
            config: args.config,
            force: args.force,
            fetch: args.fetch,
            stdout: args.stdout,
            stderr: args.stderr,
            env: args.env.into_iter().collect(),
        }
    }
}

pub async fn run(home: Option<&Path>, args: RunArgs) -> Result<()> {
    let orch = super::open(home)?;
    let outcome = orch.run(args.into()).await?;

    if use_color() {
        println!("  {} {}", "\u{25cf}".green(), outcome.message);
    } else {
        println!("  {}", outcome.message);
    }
    println!("    stdout: {}", outcome.record.stdout_path.display());
    println!("    stderr: {}", outcome.record.stderr_path.display());
    if !outcome.stuck_ports.is_empty() {
        let ports: Vec<String> = outcome.stuck_ports.iter().map(u16::to_string).collect();
        eprintln!("  warning: ports still busy: {}", ports.join(", "));
    }
    Ok(())
}
