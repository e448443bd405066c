//! Row-count data-quality checks over the curated warehouse tables.
//!
//! Each check is a `SELECT COUNT(*)` query paired with the count it must
//! return. Any mismatch fails the whole table with a [`QualityError`] that
//! lists every failing check.

use anyhow::Result;
use sqlx::SqlitePool;
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Copy)]
pub struct QualityCheck {
    pub check_sql: &'static str,
    pub expected: i64,
}

pub const FLIGHT_CHECKS: &[QualityCheck] = &[
    QualityCheck {
        check_sql: "SELECT COUNT(*) FROM flights WHERE flight_number IS NULL",
        expected: 0,
    },
    QualityCheck {
        check_sql: "SELECT COUNT(*) FROM flights WHERE scheduled_departure > scheduled_arrival",
        expected: 0,
    },
];

pub const CARGO_CHECKS: &[QualityCheck] = &[
    QualityCheck {
        check_sql: "SELECT COUNT(*) FROM cargo_manifests WHERE weight_kg <= 0",
        expected: 0,
    },
    QualityCheck {
        check_sql: "SELECT COUNT(*) FROM cargo_manifests WHERE flight_number IS NULL",
        expected: 0,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub struct FailedCheck {
    pub check_sql: String,
    pub expected: i64,
    pub actual: i64,
}

impl fmt::Display for FailedCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{check_sql: {}, expected: {}, actual: {}}}",
            self.check_sql, self.expected, self.actual
        )
    }
}

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("Data quality checks failed for {table}: [{}]", format_failed(.failed))]
    ChecksFailed {
        table: String,
        failed: Vec<FailedCheck>,
    },
    #[error("data quality query failed: {0}")]
    Query(#[from] sqlx::Error),
}

fn format_failed(failed: &[FailedCheck]) -> String {
    failed
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Run `checks` and fail if any count differs from its expectation.
pub async fn run_checks(
    pool: &SqlitePool,
    table: &str,
    checks: &[QualityCheck],
) -> Result<(), QualityError> {
    info!(table, checks = checks.len(), "running data quality checks");

    let mut failed = Vec::new();
    for check in checks {
        let actual: i64 = sqlx::query_scalar(check.check_sql).fetch_one(pool).await?;
        if actual != check.expected {
            error!(
                check_sql = check.check_sql,
                expected = check.expected,
                actual,
                "data quality check failed"
            );
            failed.push(FailedCheck {
                check_sql: check.check_sql.to_string(),
                expected: check.expected,
                actual,
            });
        }
    }

    if failed.is_empty() {
        info!(table, "all data quality checks passed");
        Ok(())
    } else {
        Err(QualityError::ChecksFailed {
            table: table.to_string(),
            failed,
        })
    }
}

pub async fn check_flights(pool: &SqlitePool) -> Result<(), QualityError> {
    run_checks(pool, "flights", FLIGHT_CHECKS).await
}

pub async fn check_cargo(pool: &SqlitePool) -> Result<(), QualityError> {
    run_checks(pool, "cargo_manifests", CARGO_CHECKS).await
}

/// CLI entry point for `avrag quality`.
pub async fn run_quality(config: &Config) -> Result<()> {
    let pool = db::connect_warehouse(config).await?;
    let flights = check_flights(&pool).await;
    let cargo = check_cargo(&pool).await;
    pool.close().await;

    for (table, outcome) in [("flights", &flights), ("cargo_manifests", &cargo)] {
        match outcome {
            Ok(()) => println!("{}: ok", table),
            Err(e) => println!("{}: {}", table, e),
        }
    }
    flights?;
    cargo?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_warehouse;
    use crate::sample_data;

    async fn warehouse() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate_warehouse(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn sample_data_passes() {
        let pool = warehouse().await;
        sample_data::load_curated(&pool).await.unwrap();
        check_flights(&pool).await.unwrap();
        check_cargo(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn non_positive_weight_fails_cargo_checks() {
        let pool = warehouse().await;
        sqlx::query(
            "INSERT INTO cargo_manifests (flight_number, waybill_number, weight_kg, loaded_at) \
             VALUES ('FX5101', 'W1', 0, 'now'), (NULL, 'W2', 10, 'now')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = check_cargo(&pool).await.unwrap_err();
        match &err {
            QualityError::ChecksFailed { table, failed } => {
                assert_eq!(table, "cargo_manifests");
                assert_eq!(failed.len(), 2);
                assert!(failed.iter().all(|c| c.expected == 0 && c.actual == 1));
            }
            other => panic!("unexpected error: {other}"),
        }
        let msg = err.to_string();
        assert!(msg.starts_with("Data quality checks failed for cargo_manifests:"));
        assert!(msg.contains("weight_kg <= 0"));
    }

    #[tokio::test]
    async fn departure_after_arrival_fails_flight_checks() {
        let pool = warehouse().await;
        sqlx::query(
            "INSERT INTO flights (flight_number, scheduled_departure, scheduled_arrival, loaded_at) \
             VALUES ('XX1', '2024-01-15T12:00:00', '2024-01-15T10:00:00', 'now')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let err = check_flights(&pool).await.unwrap_err();
        match err {
            QualityError::ChecksFailed { failed, .. } => {
                assert_eq!(failed.len(), 1);
                assert!(failed[0].check_sql.contains("scheduled_departure > scheduled_arrival"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
