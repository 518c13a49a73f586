use std::path::Path;

use anyhow::Result;

pub async fn run(home: Option<&Path>, all: bool) -> Result<()> {
    let orch = super::open(home)?;
    let removed = orch.clean(all).await?;
    if removed.is_empty() {
        println!("  Nothing to clean.");
        return Ok(());
    }
    for name in &removed {
        println!("  removed {}", name);
    }
    Ok(())
}
