//! Configuration view and validation commands: `harness config`.

use anyhow::{Context, Result};

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use harness::artifacts::ArtifactStore;
    use harness::config::HarnessToml;

    let store = ArtifactStore::new(project_dir);
    let config_path = store.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Harness Configuration");
            println!("=====================");
            println!();

            let mut toml = if config_path.exists() {
                println!("Config file: {}", config_path.display());
                HarnessToml::load(&config_path)?
            } else {
                println!("No harness.toml found at {}", config_path.display());
                println!("Using default configuration.");
                HarnessToml::default()
            };
            println!();

            for warning in toml.apply_env() {
                println!("  warning: {}", warning);
            }

            println!("Effective values (with env overrides):");
            println!();
            let rendered =
                toml::to_string_pretty(&toml).context("Failed to render configuration")?;
            for line in rendered.lines() {
                println!("  {}", line);
            }
            println!();

            let ctx = toml.to_run_context(project_dir);
            println!("Stage providers:");
            for (stage, selection) in &ctx.stages {
                println!("  {:<20} {}", stage.as_str(), selection);
            }
            println!();

            if !config_path.exists() {
                println!("Run 'harness config init' to create a harness.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No harness.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = HarnessToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("harness.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(store.harness_dir())
                .with_context(|| format!("Failed to create {}", store.harness_dir().display()))?;
            HarnessToml::default().save(&config_path)?;

            println!("Created harness.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [defaults] max_iterations, tasks_per_iteration, question_batches");
            println!("  - [stages.<stage>] provider, model");
            println!("  - [review] categories, iterations, unit_test_prep");
            println!("  - [debug] enabled, [debug.breakpoints.<stage>]");
            println!("  - [git] mode, remote");
            println!();
        }
    }

    Ok(())
}
