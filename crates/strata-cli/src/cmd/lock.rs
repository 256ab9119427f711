use anyhow::Context;
use clap::Subcommand;
use std::path::Path;

use crate::archive::Archive;
use crate::output::{format_opt_time, format_time, print_json, print_table};

#[derive(Subcommand)]
pub enum LockSubcommand {
    /// List service locks and their schedule
    List,
    /// Allow a lock's job to run
    Enable { key: String },
    /// Stop a lock's job from being claimed
    Disable { key: String },
}

pub fn run(root: &Path, subcmd: LockSubcommand, json: bool) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    match subcmd {
        LockSubcommand::List => list(&archive, json),
        LockSubcommand::Enable { key } => set_enabled(&archive, &key, true, json),
        LockSubcommand::Disable { key } => set_enabled(&archive, &key, false, json),
    }
}

fn list(archive: &Archive, json: bool) -> anyhow::Result<()> {
    let locks = archive.catalog.list_service_locks()?;
    if json {
        return print_json(&locks);
    }
    if locks.is_empty() {
        println!("No service locks. Run 'strata init' or add a filesystem.");
        return Ok(());
    }
    let rows = locks
        .iter()
        .map(|lock| {
            vec![
                lock.key.clone(),
                if lock.enabled { "yes" } else { "no" }.to_string(),
                lock.state.to_string(),
                format_time(lock.scheduled_time),
                format_opt_time(lock.last_run),
                lock.last_outcome.clone().unwrap_or_else(|| "-".to_string()),
                lock.owner.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();
    print_table(
        &["LOCK", "ENABLED", "STATE", "NEXT RUN", "LAST RUN", "OUTCOME", "OWNER"],
        rows,
    );
    Ok(())
}

fn set_enabled(archive: &Archive, key: &str, enabled: bool, json: bool) -> anyhow::Result<()> {
    archive
        .catalog
        .set_service_lock_enabled(key, enabled)
        .with_context(|| format!("service lock '{key}' not found"))?;
    if json {
        print_json(&serde_json::json!({ "key": key, "enabled": enabled }))?;
    } else if enabled {
        println!("Enabled {key}");
    } else {
        println!("Disabled {key}");
    }
    Ok(())
}
