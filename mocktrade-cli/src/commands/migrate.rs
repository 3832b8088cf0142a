//! Migration commands - apply the declared list, or one unit by name

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use mocktrade_core::{DataTier, MigrationOutcome};

use crate::migrations;

#[derive(Parser, Debug)]
pub struct MigrateOneArgs {
    /// Name of the declared unit to apply (see `mocktrade migrations`)
    pub name: String,
}

pub async fn run_migrate(tier: &DataTier) -> Result<()> {
    let runner = tier
        .migration_runner()
        .await
        .context("failed to open primary store")?;
    let units = migrations::declared();

    let report = runner.apply_all(&units).await?;
    println!(
        "✅ {} applied, {} already applied ({} total)",
        report.applied(),
        report.skipped(),
        report.entries().len()
    );
    Ok(())
}

pub async fn run_migrate_one(tier: &DataTier, args: MigrateOneArgs) -> Result<()> {
    let unit = migrations::find(&args.name).ok_or_else(|| {
        let known: Vec<_> = migrations::declared()
            .into_iter()
            .map(|u| u.name.into_owned())
            .collect();
        anyhow!(
            "unknown migration '{}'\n\nDeclared units:\n  {}",
            args.name,
            known.join("\n  ")
        )
    })?;

    let runner = tier
        .migration_runner()
        .await
        .context("failed to open primary store")?;

    match runner.apply_one(&unit).await? {
        MigrationOutcome::Applied => println!("✅ {} applied", unit.name),
        MigrationOutcome::AlreadyApplied => println!("⏭  {} already applied", unit.name),
        MigrationOutcome::Failed(reason) => return Err(anyhow!("{}: {reason}", unit.name)),
    }
    Ok(())
}

/// Print the declared order without touching the store
pub fn run_list() -> Result<()> {
    for (position, unit) in migrations::declared().iter().enumerate() {
        println!("{:>3}  {}", position + 1, unit.name);
    }
    Ok(())
}
