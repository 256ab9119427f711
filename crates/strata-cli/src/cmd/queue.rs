use clap::Subcommand;
use std::path::Path;

use strata_core::types::QueueType;

use crate::archive::Archive;
use crate::output::{format_time, print_json, print_table};

#[derive(Subcommand)]
pub enum QueueSubcommand {
    /// List work queue entries, soonest first
    List {
        /// Only entries of this type (e.g. tier-migrate, purge-study)
        #[arg(long = "type")]
        queue_type: Option<QueueType>,
        /// Only entries targeting this study
        #[arg(long)]
        study: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: QueueSubcommand, json: bool) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    match subcmd {
        QueueSubcommand::List { queue_type, study } => {
            list(&archive, queue_type, study.as_deref(), json)
        }
    }
}

fn list(
    archive: &Archive,
    queue_type: Option<QueueType>,
    study: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let mut entries = archive.catalog.list_work_queue(queue_type)?;
    if let Some(study) = study {
        entries.retain(|e| e.study_key.as_deref() == Some(study));
    }

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("Work queue is empty.");
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|e| {
            vec![
                e.id.to_string(),
                e.queue_type.to_string(),
                e.study_key.clone().unwrap_or_else(|| "-".to_string()),
                e.filesystem_key.clone().unwrap_or_else(|| "-".to_string()),
                format_time(e.scheduled_time),
                e.status.to_string(),
                e.retry_count.to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "TYPE", "STUDY", "FILESYSTEM", "SCHEDULED", "STATUS", "RETRIES"],
        rows,
    );
    Ok(())
}
