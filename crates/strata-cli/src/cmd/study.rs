use anyhow::{anyhow, Context};
use clap::Subcommand;
use std::path::Path;

use strata_core::attribute::{self, AttributeValue};
use strata_core::filesystem::FilesystemSelector;
use strata_core::study::StudyStorage;
use strata_core::subject::AttributeSource;

use crate::archive::Archive;
use crate::output::{format_bytes, format_time, print_json, print_table};

#[derive(Subcommand)]
pub enum StudySubcommand {
    /// Record a stored study and its attributes
    Add {
        /// Study instance UID
        key: String,
        /// Filesystem holding the study (default: let the selector place it)
        #[arg(long)]
        filesystem: Option<String>,
        /// Size on disk in bytes
        #[arg(long, default_value_t = 0)]
        size: u64,
        /// Data set attribute, as Keyword=Value (repeatable)
        #[arg(long = "attr", value_name = "KEYWORD=VALUE")]
        attrs: Vec<String>,
        /// File meta attribute, as Keyword=Value (repeatable)
        #[arg(long = "meta", value_name = "KEYWORD=VALUE")]
        meta: Vec<String>,
    },
    /// List stored studies
    List {
        /// Only studies on this filesystem
        #[arg(long)]
        filesystem: Option<String>,
    },
}

pub fn run(root: &Path, subcmd: StudySubcommand, json: bool) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    match subcmd {
        StudySubcommand::Add {
            key,
            filesystem,
            size,
            attrs,
            meta,
        } => {
            let sources = vec![source("dataset", &attrs)?, source("meta", &meta)?];
            add(&archive, &key, filesystem, size, sources, json)
        }
        StudySubcommand::List { filesystem } => list(&archive, filesystem.as_deref(), json),
    }
}

/// Parse `Keyword=Value` pairs, rejecting keywords the dictionary does not know.
fn source(name: &str, pairs: &[String]) -> anyhow::Result<AttributeSource> {
    let mut source = AttributeSource::new(name);
    for pair in pairs {
        let (keyword, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEYWORD=VALUE, got '{pair}'"))?;
        let keyword = keyword.trim();
        if attribute::lookup(keyword).is_none() {
            anyhow::bail!("unknown attribute keyword '{keyword}'");
        }
        source = source.with(keyword, AttributeValue::text(value));
    }
    Ok(source)
}

fn add(
    archive: &Archive,
    key: &str,
    filesystem: Option<String>,
    size: u64,
    sources: Vec<AttributeSource>,
    json: bool,
) -> anyhow::Result<()> {
    let filesystem_key = match filesystem {
        Some(fs) => archive
            .catalog
            .load_filesystem(&fs)
            .with_context(|| format!("filesystem '{fs}' not found"))?
            .key,
        None => {
            let monitor = archive.monitor();
            monitor.refresh(&archive.catalog)?;
            FilesystemSelector::new(&monitor)
                .select()
                .ok_or_else(|| anyhow!("no writable filesystem has room for study '{key}'"))?
                .key
        }
    };

    let study = StudyStorage::new(key, filesystem_key, size, sources);
    archive
        .catalog
        .insert_study(&study)
        .with_context(|| format!("failed to add study '{key}'"))?;

    if json {
        print_json(&study)?;
    } else {
        println!("Added study '{}' on {}", study.study_key, study.filesystem_key);
    }
    Ok(())
}

fn list(archive: &Archive, filesystem: Option<&str>, json: bool) -> anyhow::Result<()> {
    let studies = match filesystem {
        Some(fs) => archive.catalog.studies_on_filesystem(fs)?,
        None => archive.catalog.list_studies()?,
    };

    if json {
        return print_json(&studies);
    }
    if studies.is_empty() {
        println!("No studies.");
        return Ok(());
    }
    let rows = studies
        .iter()
        .map(|s| {
            vec![
                s.study_key.clone(),
                s.filesystem_key.clone(),
                format_bytes(s.size_bytes),
                format_time(s.created_at),
            ]
        })
        .collect();
    print_table(&["STUDY", "FILESYSTEM", "SIZE", "ADDED"], rows);
    Ok(())
}
