//! The declared migration list.
//!
//! Order here is the order of application. File names are labels only;
//! corrections are appended as new units rather than edited in place.

use futures::future::BoxFuture;
use mocktrade_core::{MigrationUnit, ScriptError};
use sqlx::PgPool;

const SEED_SYMBOLS: &[(&str, &str, &str)] = &[
    ("AAPL", "Apple Inc.", "NASDAQ"),
    ("MSFT", "Microsoft Corporation", "NASDAQ"),
    ("GOOG", "Alphabet Inc.", "NASDAQ"),
    ("JPM", "JPMorgan Chase & Co.", "NYSE"),
    ("XOM", "Exxon Mobil Corporation", "NYSE"),
];

pub fn declared() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::sql(
            "001_create_users",
            include_str!("../../migrations/001_create_users.sql"),
        ),
        MigrationUnit::sql(
            "002_create_accounts",
            include_str!("../../migrations/002_create_accounts.sql"),
        ),
        MigrationUnit::sql(
            "003_create_orders",
            include_str!("../../migrations/003_create_orders.sql"),
        ),
        MigrationUnit::sql(
            "004_create_trades",
            include_str!("../../migrations/004_create_trades.sql"),
        ),
        MigrationUnit::sql(
            "005_create_positions",
            include_str!("../../migrations/005_create_positions.sql"),
        ),
        MigrationUnit::sql(
            "006_orders_symbol_index",
            include_str!("../../migrations/006_orders_symbol_index.sql"),
        ),
        MigrationUnit::sql(
            "007_accounts_non_negative_cash",
            include_str!("../../migrations/007_accounts_non_negative_cash.sql"),
        ),
        MigrationUnit::sql(
            "008_orders_time_in_force",
            include_str!("../../migrations/008_orders_time_in_force.sql"),
        ),
        MigrationUnit::function("009_create_symbols", create_symbols),
    ]
}

pub fn find(name: &str) -> Option<MigrationUnit> {
    declared().into_iter().find(|unit| unit.name == name)
}

/// Table and reference rows in one transaction, so a rerun stops at the
/// duplicate table before touching the rows.
fn create_symbols(pool: PgPool) -> BoxFuture<'static, Result<(), ScriptError>> {
    Box::pin(async move {
        let mut tx = pool.begin().await?;
        sqlx::Executor::execute(
            &mut *tx,
            sqlx::raw_sql(include_str!("../../migrations/009_create_symbols.sql")),
        )
        .await?;

        for &(symbol, name, exchange) in SEED_SYMBOLS {
            sqlx::query("INSERT INTO symbols (symbol, name, exchange) VALUES ($1, $2, $3)")
                .bind(symbol)
                .bind(name)
                .bind(exchange)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok::<(), ScriptError>(())
    })
}
