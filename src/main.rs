use clap::{CommandFactory, Parser};
use clap_complete::aot::generate;
use procrig::cli::{Cli, Commands};
use procrig::commands;
use procrig::logs::LogStream;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let home = cli.global.home.as_deref();

    let result = match cli.command {
        Commands::Run(args) => commands::run::run(home, args).await,
        Commands::Stop { name } => commands::stop::stop(home, &name).await,
        Commands::Delete { name } => commands::stop::delete(home, &name).await,
        Commands::List { json } => commands::list::run(home, json).await,
        Commands::Logs {
            name,
            lines,
            stdout,
            stderr,
            follow,
        } => {
            let only = match (stdout, stderr) {
                (true, _) => Some(LogStream::Stdout),
                (_, true) => Some(LogStream::Stderr),
                _ => None,
            };
            commands::logs::run(home, &name, lines, only, follow).await
        }
        Commands::Watch(args) => commands::watch::run(home, args).await,
        Commands::Clean { all } => commands::clean::run(home, all).await,
        Commands::Dashboard { port } => commands::dashboard::run(home, port).await,
        Commands::Completions { shell } => {
            generate(shell, &mut Cli::command(), "procrig", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
