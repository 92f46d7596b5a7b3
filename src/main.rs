use anyhow::{Context, Result};
use stagehand::cli::commands::{
    CheckpointsAction, ListCheckpointsCommand, ShowCheckpointCommand, ValidateCommand,
};
use stagehand::cli::output::*;
use stagehand::cli::{Cli, Command};
use stagehand::core::config::{EngineConfig, PipelineConfig};
use stagehand::{CheckpointStore, SharedStateStore};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Checkpoints(cmd) => {
            let store = open_checkpoints(&cli).await?;
            match &cmd.action {
                CheckpointsAction::List(list) => list_checkpoints(&store, list).await?,
                CheckpointsAction::Show(show) => show_checkpoint(&store, show).await?,
            }
        }
    }

    Ok(())
}

fn load_engine_config(cli: &Cli) -> Result<EngineConfig> {
    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("Failed to load engine config {}", path))?,
        None => EngineConfig::default(),
    };
    config.with_env().context("Invalid engine environment")
}

async fn open_checkpoints(cli: &Cli) -> Result<CheckpointStore> {
    let config = load_engine_config(cli)?;
    CheckpointStore::from_config(&config, Arc::new(SharedStateStore::new()))
        .await
        .context("Failed to open checkpoint sinks")
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    let result = PipelineConfig::from_file(&cmd.file).and_then(|config| {
        let definition = config.to_definition()?;
        definition.validate()?;
        Ok((config, definition))
    });

    match result {
        Ok((config, definition)) => {
            println!("{} Pipeline configuration is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Stages: {}", style(config.stages.len()).cyan());
            println!("  Parallel groups: {}", style(config.parallel_groups()).cyan());
            println!(
                "  Executors: {}",
                style(definition.executor_ids().join(", ")).dim()
            );

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn list_checkpoints(store: &CheckpointStore, cmd: &ListCheckpointsCommand) -> Result<()> {
    let checkpoints = store.list_checkpoints().await;

    if cmd.json {
        let data = serde_json::json!({ "checkpoints": checkpoints });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("{} No checkpoints found", INFO);
        return Ok(());
    }

    println!(
        "{} Checkpoints ({}):",
        INFO,
        style(store.sink_names().join(", ")).dim()
    );
    for summary in &checkpoints {
        println!("  {}", format_checkpoint_summary(summary));
    }

    Ok(())
}

async fn show_checkpoint(store: &CheckpointStore, cmd: &ShowCheckpointCommand) -> Result<()> {
    let Some((checkpoint, sink)) = store.load(&cmd.namespace).await else {
        println!("{} No checkpoint for {}", WARN, style(&cmd.namespace).bold());
        std::process::exit(1);
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&checkpoint)?);
        return Ok(());
    }

    println!("{} Checkpoint Details", INFO);
    println!("  Namespace: {}", style(&checkpoint.namespace).bold());
    println!(
        "  Resumes after: stage {} ({})",
        style(checkpoint.stage_index).cyan(),
        checkpoint.stage_name
    );
    println!(
        "  Checkpointed: {}",
        style(checkpoint.checkpointed_at.to_rfc3339()).dim()
    );
    println!("  Sink: {}", style(&sink).dim());

    let mut keys: Vec<&String> = checkpoint.data.keys().collect();
    keys.sort();
    println!("\n  {}", style("State:").bold());
    for key in keys {
        let rendered = format_state_value(key, &checkpoint.data[key], 5);
        for line in rendered.lines() {
            println!("    {}", line);
        }
    }

    Ok(())
}
