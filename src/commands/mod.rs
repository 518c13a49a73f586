pub mod clean;
pub mod dashboard;
pub mod list;
pub mod logs;
pub mod run;
pub mod stop;
pub mod watch;

use std::path::Path;

use anyhow::{Context, Result};
use is_terminal::IsTerminal;

use crate::orchestrator::Orchestrator;
use crate::settings::Home;

/// Open the supervisor rooted at `home` (or the default home).
pub fn open(home: Option<&Path>) -> Result<Orchestrator> {
    let home = Home::resolve(home);
    Orchestrator::open(home.clone())
        .with_context(|| format!("opening supervisor home {}", home.root().display()))
}

pub(crate) fn use_color() -> bool {
    std::io::stdout().is_terminal()
}
