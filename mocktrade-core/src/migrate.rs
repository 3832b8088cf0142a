//! Ordered, forward-only migration runner
//!
//! Units run strictly in the order they are declared. There is no ledger
//! table: a unit whose script is rejected because the schema object already
//! exists counts as already applied, and any other failure aborts the run.
//!
//! That duplicate check is an approximation for multi-statement units: one
//! duplicate-object error marks the whole unit as applied, even if later
//! statements in it never ran on a previous attempt.

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::error::{MigrationError, ScriptError};

/// SQLSTATE codes meaning "an object with this name already exists".
///
/// `42P07` covers tables, indexes, views and sequences; `42710` covers
/// constraints, types and triggers.
const DUPLICATE_OBJECT_CODES: &[(&str, &str)] = &[
    ("42P07", "duplicate_table"),
    ("42710", "duplicate_object"),
    ("42701", "duplicate_column"),
    ("42P06", "duplicate_schema"),
    ("42723", "duplicate_function"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    DuplicateObject,
    Other,
}

pub fn classify(err: &ScriptError) -> ErrorClass {
    match err.code.as_deref() {
        Some(code) if DUPLICATE_OBJECT_CODES.iter().any(|(c, _)| *c == code) => {
            ErrorClass::DuplicateObject
        }
        _ => ErrorClass::Other,
    }
}

/// Anything a migration script can run against.
#[async_trait]
pub trait MigrationTarget: Clone + Send + Sync + 'static {
    async fn execute_script(&self, script: &str) -> Result<(), ScriptError>;
}

#[async_trait]
impl MigrationTarget for PgPool {
    /// Runs the whole script as one simple-protocol batch, which Postgres
    /// executes in a single implicit transaction.
    async fn execute_script(&self, script: &str) -> Result<(), ScriptError> {
        sqlx::raw_sql(script).execute(self).await?;
        Ok(())
    }
}

pub type MigrationFn<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), ScriptError>> + Send + Sync>;

pub enum MigrationSource<T> {
    Sql(Cow<'static, str>),
    Function(MigrationFn<T>),
}

impl<T> Clone for MigrationSource<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sql(sql) => Self::Sql(sql.clone()),
            Self::Function(f) => Self::Function(Arc::clone(f)),
        }
    }
}

/// One named step. The name must be unique within a declared list.
pub struct MigrationUnit<T = PgPool> {
    pub name: Cow<'static, str>,
    pub source: MigrationSource<T>,
}

impl<T> Clone for MigrationUnit<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
        }
    }
}

impl<T> fmt::Debug for MigrationUnit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.source {
            MigrationSource::Sql(_) => "sql",
            MigrationSource::Function(_) => "function",
        };
        f.debug_struct("MigrationUnit")
            .field("name", &self.name)
            .field("source", &kind)
            .finish()
    }
}

impl<T> MigrationUnit<T> {
    pub fn sql(name: impl Into<Cow<'static, str>>, sql: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            source: MigrationSource::Sql(sql.into()),
        }
    }

    pub fn function<F>(name: impl Into<Cow<'static, str>>, f: F) -> Self
    where
        F: Fn(T) -> BoxFuture<'static, Result<(), ScriptError>> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: MigrationSource::Function(Arc::new(f)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    Applied,
    AlreadyApplied,
    Failed(String),
}

/// Outcomes of one run, in execution order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    entries: Vec<(String, MigrationOutcome)>,
}

impl MigrationReport {
    pub fn entries(&self) -> &[(String, MigrationOutcome)] {
        &self.entries
    }

    pub fn outcomes(&self) -> Vec<MigrationOutcome> {
        self.entries.iter().map(|(_, o)| o.clone()).collect()
    }

    pub fn applied(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::Applied))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, MigrationOutcome::AlreadyApplied))
    }

    fn count(&self, pred: impl Fn(&MigrationOutcome) -> bool) -> usize {
        self.entries.iter().filter(|(_, o)| pred(o)).count()
    }

    fn push(&mut self, name: &str, outcome: MigrationOutcome) {
        self.entries.push((name.to_string(), outcome));
    }
}

pub struct MigrationRunner<T: MigrationTarget = PgPool> {
    target: T,
}

impl<T: MigrationTarget> MigrationRunner<T> {
    pub fn new(target: T) -> Self {
        Self { target }
    }

    /// Apply every unit in order, stopping at the first fatal failure.
    pub async fn apply_all(
        &self,
        units: &[MigrationUnit<T>],
    ) -> Result<MigrationReport, MigrationError> {
        info!(count = units.len(), "running migrations");
        let mut report = MigrationReport::default();
        let mut done: HashSet<&str> = HashSet::new();

        for unit in units {
            if !done.insert(unit.name.as_ref()) {
                warn!(unit = %unit.name, "unit already completed in this run; not reapplying");
                report.push(&unit.name, MigrationOutcome::AlreadyApplied);
                continue;
            }

            match self.execute(unit).await {
                Ok(outcome) => report.push(&unit.name, outcome),
                Err(source) => {
                    report.push(&unit.name, MigrationOutcome::Failed(source.to_string()));
                    return Err(MigrationError::Fatal {
                        unit: unit.name.to_string(),
                        report,
                        source,
                    });
                }
            }
        }

        info!(
            applied = report.applied(),
            skipped = report.skipped(),
            "migrations complete"
        );
        Ok(report)
    }

    /// Apply a single unit out of band, with the same classification rules.
    pub async fn apply_one(&self, unit: &MigrationUnit<T>) -> Result<MigrationOutcome, MigrationError> {
        match self.execute(unit).await {
            Ok(outcome) => Ok(outcome),
            Err(source) => {
                let mut report = MigrationReport::default();
                report.push(&unit.name, MigrationOutcome::Failed(source.to_string()));
                Err(MigrationError::Fatal {
                    unit: unit.name.to_string(),
                    report,
                    source,
                })
            }
        }
    }

    async fn execute(&self, unit: &MigrationUnit<T>) -> Result<MigrationOutcome, ScriptError> {
        let result = match &unit.source {
            MigrationSource::Sql(sql) => self.target.execute_script(sql).await,
            MigrationSource::Function(f) => f(self.target.clone()).await,
        };

        match result {
            Ok(()) => {
                info!(unit = %unit.name, "migration applied");
                Ok(MigrationOutcome::Applied)
            }
            Err(err) if classify(&err) == ErrorClass::DuplicateObject => {
                info!(
                    unit = %unit.name,
                    code = err.code.as_deref().unwrap_or_default(),
                    "migration already applied; skipping"
                );
                Ok(MigrationOutcome::AlreadyApplied)
            }
            Err(err) => {
                error!(
                    unit = %unit.name,
                    code = err.code.as_deref().unwrap_or("none"),
                    error = %err,
                    "migration failed"
                );
                Err(err)
            }
        }
    }
}
