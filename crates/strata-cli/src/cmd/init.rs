use anyhow::Context;
use std::path::Path;

use strata_core::config::Config;
use strata_core::rule::RULES_TEMPLATE;
use strata_core::{io, paths};

use crate::archive::Archive;
use crate::output::print_json;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create {}", root.display()))?;
    if !json {
        println!("Initializing strata in: {}", root.display());
    }

    let config_path = paths::config_path(root);
    let config_created = !config_path.exists();
    if config_created {
        Config::default()
            .save(root)
            .context("failed to write strata.yaml")?;
    }
    report(json, config_created, paths::CONFIG_FILE);

    let archive = Archive::open(root)?;
    let rules_path = archive.config.rules_path(root);
    let rules_created = io::write_if_missing(&rules_path, RULES_TEMPLATE.as_bytes())
        .with_context(|| format!("failed to write {}", rules_path.display()))?;
    report(json, rules_created, &rules_path.display().to_string());

    let seeded = archive.seed_locks()?;

    if json {
        print_json(&serde_json::json!({
            "root": root,
            "config_created": config_created,
            "rules_created": rules_created,
            "locks_seeded": seeded,
        }))?;
    } else {
        println!("  seeded:  {seeded} service lock(s)");
    }
    Ok(())
}

fn report(json: bool, created: bool, what: &str) {
    if json {
        return;
    }
    if created {
        println!("  created: {what}");
    } else {
        println!("  exists:  {what}");
    }
}
