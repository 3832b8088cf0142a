//! Bootstrap record - create the first trader with a funded cash account

use anyhow::{bail, Context, Result};
use clap::Parser;
use mocktrade_core::DataTier;
use sqlx::Row;
use tracing::info;

#[derive(Parser, Debug)]
pub struct SeedAccountArgs {
    /// Username of the trader to create
    #[arg(long, default_value = "demo")]
    pub username: String,

    /// Contact email for the trader
    #[arg(long, default_value = "demo@mocktrade.local")]
    pub email: String,

    /// Opening cash balance in USD
    #[arg(long, default_value = "100000.00")]
    pub balance: String,
}

/// The balance is bound as text and cast by Postgres; this only screens out
/// values the account constraint would not catch.
fn validate_balance(raw: &str) -> Result<()> {
    let balance: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("invalid balance '{raw}'"))?;
    if !balance.is_finite() {
        bail!("balance must be a finite amount, got '{raw}'");
    }
    if balance < 0.0 {
        bail!("balance must not be negative");
    }
    Ok(())
}

pub async fn run_seed_account(tier: &DataTier, args: SeedAccountArgs) -> Result<()> {
    validate_balance(&args.balance)?;

    let pool = tier.pool().await.context("failed to open primary store")?;
    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (username, email) VALUES ($1, $2)
        ON CONFLICT (username) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(&args.username)
    .bind(&args.email)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to insert user (have migrations been applied?)")?;

    let Some(row) = inserted else {
        tx.rollback().await?;
        println!("ℹ️  user '{}' already exists; nothing to do", args.username);
        return Ok(());
    };
    let user_id: i64 = row.get("id");

    sqlx::query(
        "INSERT INTO accounts (user_id, currency, cash_balance) VALUES ($1, 'USD', $2::numeric)",
    )
    .bind(user_id)
    .bind(&args.balance)
    .execute(&mut *tx)
    .await
    .context("failed to create cash account")?;

    tx.commit().await?;
    info!(user_id, username = %args.username, "bootstrap account created");
    println!("✅ created '{}' (id {user_id}) with {} USD", args.username, args.balance);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_amounts() {
        assert!(validate_balance("100000.00").is_ok());
        assert!(validate_balance("0").is_ok());
    }

    #[test]
    fn rejects_negative_and_garbage() {
        assert!(validate_balance("-1").is_err());
        assert!(validate_balance("lots").is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        for raw in ["NaN", "nan", "inf", "-infinity"] {
            let err = validate_balance(raw).unwrap_err();
            assert!(err.to_string().contains("finite"), "{raw}: {err}");
        }
    }
}
