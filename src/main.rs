use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::Path;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_descriptor::{ConfigFormat, EcosystemConfig, LaunchSpec};
use vigil_log_collection::{LogEntry, LogSource};
use vigil_supervisor::{Supervisor, SupervisorOptions};

mod cli;
mod logging;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load(cli.command.file())?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.supervisor.log_level.clone());
    logging::init(&level)?;

    match cli.command {
        Commands::Validate { ref file } => validate(file, &config),
        Commands::Show { format, .. } => {
            let rendered = config
                .to_string_as(ConfigFormat::from(format))
                .context("failed to render ecosystem file")?;
            print!("{}", rendered);
            if !rendered.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Commands::Run { only, attach, .. } => {
            let options = SupervisorOptions::from_settings(&config.supervisor, cli.home.clone());
            run(config, options, &only, attach).await
        }
    }
}

fn load(path: &Path) -> Result<EcosystemConfig> {
    EcosystemConfig::load_from_file(path)
        .with_context(|| format!("failed to load ecosystem file {}", path.display()))
}

/// Report every app that could not be launched as configured.
fn validate(path: &Path, config: &EcosystemConfig) -> Result<()> {
    let failures = launch_failures(config);

    for app in &config.apps {
        match failures.iter().find(|(name, _)| name == &app.name) {
            Some((_, reason)) => println!("FAIL  {}: {}", app.name, reason),
            None => println!("ok    {}", app.name),
        }
    }

    if !failures.is_empty() {
        bail!(
            "{}: {} of {} apps cannot be launched",
            path.display(),
            failures.len(),
            config.apps.len()
        );
    }
    Ok(())
}

fn launch_failures(config: &EcosystemConfig) -> Vec<(String, String)> {
    config
        .apps
        .iter()
        .filter_map(|app| {
            LaunchSpec::resolve(app)
                .err()
                .map(|e| (app.name.clone(), e.to_string()))
        })
        .collect()
}

async fn run(config: EcosystemConfig, options: SupervisorOptions, only: &[String], attach: bool) -> Result<()> {
    for name in only {
        if config.app(name).is_none() {
            bail!("no app named {:?} in the ecosystem file", name);
        }
    }

    let supervisor = Supervisor::new(config, options)
        .await
        .context("failed to create supervisor")?;

    // Subscribe before starting so the first lines are not missed
    let echo = attach.then(|| spawn_log_echo(supervisor.subscribe_logs()));

    if only.is_empty() {
        supervisor.start().await?;
    } else {
        for name in only {
            supervisor
                .start_app(name)
                .await
                .with_context(|| format!("failed to start {}", name))?;
        }
    }

    for status in supervisor.all_info().await {
        info!("{}-{}: {}", status.name, status.instance, status.state);
    }

    signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down...");

    let result = supervisor.shutdown().await;
    if let Some(echo) = echo {
        echo.abort();
    }
    result.context("supervisor did not shut down cleanly")
}

fn spawn_log_echo(mut logs: broadcast::Receiver<LogEntry>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match logs.recv().await {
                Ok(entry) => match entry.source {
                    LogSource::Stdout => println!("{}-{} | {}", entry.name, entry.instance, entry.message),
                    LogSource::Stderr => eprintln!("{}-{} | {}", entry.name, entry.instance, entry.message),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Terminal output fell behind, skipped {} lines", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_failures() {
        let dir = tempfile::tempdir().unwrap();
        let document = format!(
            "apps:\n  - name: shell\n    script: /bin/sh\n  - name: missing\n    script: ./main\n    cwd: {}\n",
            dir.path().display()
        );
        let config = EcosystemConfig::load_from_str(&document, ConfigFormat::Yaml).unwrap();

        let failures = launch_failures(&config);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "missing");
        assert!(validate(Path::new("ecosystem.yaml"), &config).is_err());
    }

    #[test]
    fn test_validate_passes() {
        let config = EcosystemConfig::load_from_str(
            "apps:\n  - name: shell\n    script: /bin/sh\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert!(validate(Path::new("ecosystem.yaml"), &config).is_ok());
    }
}
