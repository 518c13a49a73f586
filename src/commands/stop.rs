use std::path::Path;

use anyhow::Result;

use crate::orchestrator::StopOutcome;

pub async fn stop(home: Option<&Path>, name: &str) -> Result<()> {
    let orch = super::open(home)?;
    let outcome = orch.stop(name).await?;
    print_outcome(name, &outcome, "stopped");
    Ok(())
}

pub async fn delete(home: Option<&Path>, name: &str) -> Result<()> {
    let orch = super::open(home)?;
    let outcome = orch.delete(name).await?;
    print_outcome(name, &outcome, "deleted");
    Ok(())
}

fn print_outcome(name: &str, outcome: &StopOutcome, verb: &str) {
    match outcome {
        StopOutcome::Stopped { pid, ports } if ports.is_empty() => {
            println!("  {} '{}' (PID {})", verb, name, pid);
        }
        StopOutcome::Stopped { pid, ports } => {
            let ports: Vec<String> = ports.iter().map(u16::to_string).collect();
            println!(
                "  {} '{}' (PID {}, freed ports {})",
                verb,
                name,
                pid,
                ports.join(", ")
            );
        }
        StopOutcome::AlreadyStopped if verb == "stopped" => {
            println!("  '{}' is not running", name);
        }
        StopOutcome::AlreadyStopped => println!("  {} '{}'", verb, name),
    }
}
