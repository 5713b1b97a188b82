//! Project setup and inspection: `harness init`, `harness status`, `harness reset`.

use anyhow::{Context, Result};
use std::path::Path;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use harness::artifacts::ArtifactStore;
    use harness::config::HarnessToml;

    let store = ArtifactStore::new(project_dir);
    let was_initialized = store.harness_dir().is_dir();

    let config = HarnessToml::load_or_default(&store.harness_dir())?;
    store
        .ensure_layout(&config.review.categories)
        .context("Failed to create artifact files")?;
    if !store.config_path().exists() {
        config.save(&store.config_path())?;
    }

    if was_initialized {
        println!("Harness already initialized at {}", store.harness_dir().display());
        println!("Missing artifact files were recreated.");
        return Ok(());
    }

    println!("Initialized harness at {}", store.harness_dir().display());
    println!();
    println!("Created:");
    println!("  product-description.md   # What to build (edit this first)");
    println!("  tasks.md                 # Checklist written by planning");
    println!("  recent-changes.md        # Rolling change log");
    println!("  review/                  # One findings file per review category");
    println!("  .harness/harness.toml    # Configuration");
    println!();
    println!("Next steps:");
    println!("  1. Describe the product in product-description.md");
    println!("  2. Run `harness run`");
    Ok(())
}

pub fn cmd_status(project_dir: &Path) -> Result<()> {
    use harness::artifacts::ArtifactStore;
    use harness::session::SessionPersister;

    let store = ArtifactStore::new(project_dir);

    println!();
    println!("Harness Status");
    println!("==============");
    println!();

    if !store.harness_dir().is_dir() {
        println!("Project: Not initialized");
        println!();
        println!("Run 'harness init' to initialize the project.");
        println!();
        return Ok(());
    }
    println!("Project: Initialized");

    let description = if store.read_description()?.trim().is_empty() {
        "Missing (write product-description.md)"
    } else {
        "Ready"
    };
    println!("Description: {}", description);

    let tasks = store.read_tasks()?;
    if tasks.is_empty() {
        println!("Tasks:       None planned yet");
    } else {
        let counts = tasks.counts();
        println!("Tasks:       {} complete", counts);
        for task in tasks.incomplete().take(5) {
            println!("  [ ] {}", task.title);
        }
        if counts.remaining() > 5 {
            println!("  ... and {} more", counts.remaining() - 5);
        }
    }
    println!();

    let persister = SessionPersister::new(store);
    match persister.info() {
        Some(info) => {
            println!("Saved session:");
            println!("  Phase:     {}", info.phase.display_name());
            println!("  Iteration: {}/{}", info.iteration, info.max_iterations);
            println!(
                "  Saved at:  {}",
                info.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            if info.pending_messages > 0 {
                println!("  Queued messages: {}", info.pending_messages);
            }
            if let Some(error) = info.last_error {
                println!("  Last error: {}", console::style(error).red());
            }
            println!();
            println!("Run 'harness run' to resume or 'harness run --fresh' to start over.");
        }
        None if persister.exists() => {
            println!("Saved session: unreadable (it will be discarded on the next run)");
        }
        None => println!("Saved session: none"),
    }
    println!();
    Ok(())
}

pub fn cmd_reset(project_dir: &Path, force: bool) -> Result<()> {
    use dialoguer::Confirm;
    use harness::artifacts::ArtifactStore;
    use harness::session::SessionPersister;

    let store = ArtifactStore::new(project_dir);

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This deletes the saved session and logs. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(());
        }
    }

    SessionPersister::new(store.clone()).delete()?;
    if store.harness_dir().is_dir() {
        store.clear_commit_message()?;
    }

    let log_dir = store.log_dir();
    if log_dir.exists() {
        std::fs::remove_dir_all(&log_dir).ok();
    }

    println!("Reset complete");
    Ok(())
}
