use anyhow::Context;
use clap::Subcommand;
use std::path::{Path, PathBuf};

use strata_core::filesystem::{Filesystem, FilesystemInfo, FilesystemSelector};
use strata_core::types::FilesystemTier;

use crate::archive::Archive;
use crate::output::{format_bytes, print_json, print_table};

#[derive(Subcommand)]
pub enum FilesystemSubcommand {
    /// Register a filesystem
    Add {
        key: String,
        /// Mount path of the volume
        path: PathBuf,
        /// Storage tier (tier1, tier2, tier3)
        #[arg(long, default_value = "tier1")]
        tier: FilesystemTier,
        #[arg(long, default_value = "")]
        description: String,
        /// Percent full above which studies are purged
        #[arg(long, default_value_t = 90.0)]
        high_watermark: f64,
        /// Percent full purging brings usage back down to
        #[arg(long, default_value_t = 80.0)]
        low_watermark: f64,
        #[arg(long)]
        read_only: bool,
        #[arg(long)]
        write_only: bool,
        /// Register without enabling
        #[arg(long)]
        disabled: bool,
    },
    /// List filesystems with their current volume statistics
    List,
    /// Change a filesystem's administrative settings
    Set {
        key: String,
        #[arg(long)]
        tier: Option<FilesystemTier>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        read_only: Option<bool>,
        #[arg(long)]
        write_only: Option<bool>,
        #[arg(long)]
        high_watermark: Option<f64>,
        #[arg(long)]
        low_watermark: Option<f64>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Show which filesystem new studies would be placed on
    Select,
}

pub fn run(root: &Path, subcmd: FilesystemSubcommand, json: bool) -> anyhow::Result<()> {
    let archive = Archive::open(root)?;
    match subcmd {
        FilesystemSubcommand::Add {
            key,
            path,
            tier,
            description,
            high_watermark,
            low_watermark,
            read_only,
            write_only,
            disabled,
        } => {
            let mut fs = Filesystem::new(key, path, tier);
            fs.description = description;
            fs.high_watermark = high_watermark;
            fs.low_watermark = low_watermark;
            fs.read_only = read_only;
            fs.write_only = write_only;
            fs.enabled = !disabled;
            add(&archive, fs, json)
        }
        FilesystemSubcommand::List => list(&archive, json),
        FilesystemSubcommand::Set {
            key,
            tier,
            enabled,
            read_only,
            write_only,
            high_watermark,
            low_watermark,
            description,
        } => {
            let mut fs = archive
                .catalog
                .load_filesystem(&key)
                .with_context(|| format!("filesystem '{key}' not found"))?;
            if let Some(tier) = tier {
                fs.tier = tier;
            }
            if let Some(enabled) = enabled {
                fs.enabled = enabled;
            }
            if let Some(read_only) = read_only {
                fs.read_only = read_only;
            }
            if let Some(write_only) = write_only {
                fs.write_only = write_only;
            }
            if let Some(high) = high_watermark {
                fs.high_watermark = high;
            }
            if let Some(low) = low_watermark {
                fs.low_watermark = low;
            }
            if let Some(description) = description {
                fs.description = description;
            }
            set(&archive, &fs, json)
        }
        FilesystemSubcommand::Select => select(&archive, json),
    }
}

fn check_watermarks(fs: &Filesystem) -> anyhow::Result<()> {
    let in_range = |v: f64| (0.0..=100.0).contains(&v);
    if !in_range(fs.high_watermark) || !in_range(fs.low_watermark) {
        anyhow::bail!("watermarks must be between 0 and 100");
    }
    if fs.low_watermark > fs.high_watermark {
        anyhow::bail!(
            "low watermark {} is above high watermark {}",
            fs.low_watermark,
            fs.high_watermark
        );
    }
    Ok(())
}

fn add(archive: &Archive, fs: Filesystem, json: bool) -> anyhow::Result<()> {
    check_watermarks(&fs)?;
    archive
        .catalog
        .insert_filesystem(&fs)
        .with_context(|| format!("failed to add filesystem '{}'", fs.key))?;
    let seeded = archive.seed_locks()?;

    if json {
        print_json(&serde_json::json!({ "filesystem": fs, "locks_seeded": seeded }))?;
    } else {
        println!("Added filesystem '{}' ({}) at {}", fs.key, fs.tier, fs.path.display());
    }
    Ok(())
}

fn set(archive: &Archive, fs: &Filesystem, json: bool) -> anyhow::Result<()> {
    check_watermarks(fs)?;
    archive
        .catalog
        .update_filesystem(fs)
        .with_context(|| format!("failed to update filesystem '{}'", fs.key))?;
    if json {
        print_json(fs)?;
    } else {
        println!("Updated filesystem '{}'", fs.key);
    }
    Ok(())
}

fn list(archive: &Archive, json: bool) -> anyhow::Result<()> {
    let monitor = archive.monitor();
    monitor.refresh(&archive.catalog)?;
    let infos = monitor.snapshot();

    if json {
        return print_json(&infos);
    }
    if infos.is_empty() {
        println!("No filesystems registered.");
        return Ok(());
    }
    let rows = infos.iter().map(row).collect();
    print_table(
        &["KEY", "TIER", "STATE", "FLAGS", "FREE", "USED", "PATH"],
        rows,
    );
    Ok(())
}

fn row(info: &FilesystemInfo) -> Vec<String> {
    let fs = &info.filesystem;
    let mut flags = Vec::new();
    if !fs.enabled {
        flags.push("disabled");
    }
    if fs.read_only {
        flags.push("ro");
    }
    if fs.write_only {
        flags.push("wo");
    }
    let (free, used) = if info.is_online() {
        (
            format_bytes(info.free_bytes()),
            format!("{:.1}%", info.used_percent()),
        )
    } else {
        // Last usage recorded by the delete pass, marked as stale.
        let used = fs
            .percent_full
            .map_or_else(|| "-".to_string(), |pct| format!("{pct:.1}%*"));
        ("-".to_string(), used)
    };
    vec![
        fs.key.clone(),
        fs.tier.to_string(),
        format!("{:?}", info.availability).to_lowercase(),
        if flags.is_empty() {
            "-".to_string()
        } else {
            flags.join(",")
        },
        free,
        used,
        fs.path.display().to_string(),
    ]
}

fn select(archive: &Archive, json: bool) -> anyhow::Result<()> {
    let monitor = archive.monitor();
    monitor.refresh(&archive.catalog)?;
    let selected = FilesystemSelector::new(&monitor).select();

    if json {
        return print_json(&serde_json::json!({ "selected": selected }));
    }
    match selected {
        Some(fs) => println!("{} ({}) at {}", fs.key, fs.tier, fs.path.display()),
        None => println!("No writable filesystem has room for new studies."),
    }
    Ok(())
}
