use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use clap::Parser;

use mystic::cli::{Cli, Command};
use mystic::config::MysticConfig;
use mystic::inspector::{self, Inspector};
use mystic::mcp::McpServer;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let mut config = MysticConfig::from_env()?;
    if let Some(root) = args.root {
        config.project_root = root;
    }
    config.log_format = args.log_format.into();
    if args.no_redact {
        config.filter_sensitive = false;
    }
    config.ensure_dirs()?;

    match args.command {
        Command::Serve => serve(&config),
        Command::Discover {
            module_filter,
            include_private,
        } => {
            let found = inspector::discover(
                &config.project_root,
                module_filter.as_deref(),
                include_private,
            )?;
            for function in &found {
                println!(
                    "{}:{} {} {}",
                    function.file.display(),
                    function.line,
                    function.full_name,
                    function.signature
                );
            }
            eprintln!("{} functions", found.len());
            Ok(())
        }
        Command::Inspect { file, function } => {
            let analysis = Inspector::new().inspect_file(&file, &function)?;
            println!("{}", serde_json::to_string_pretty(&analysis.to_value())?);
            Ok(())
        }
        Command::Schema { file, function } => {
            let analysis = Inspector::new().inspect_file(&file, &function)?;
            println!("{}", serde_json::to_string_pretty(&analysis.schema)?);
            Ok(())
        }
    }
}

/// Stdio transport: one JSON-RPC object per line in, one per line out.
fn serve(config: &MysticConfig) -> Result<()> {
    let server = McpServer::new(config);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        let response = server.dispatch_line(&line);
        writeln!(stdout, "{response}").context("writing stdout")?;
        stdout.flush().ok();
    }
    Ok(())
}
