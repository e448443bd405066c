//! Warehouse ETL for one run date: staging → curated tables, then the
//! per-flight daily operations report.
//!
//! Each load replaces the curated rows for the run date inside a single
//! transaction, so re-running a date does not duplicate rows.

use anyhow::Result;
use chrono::NaiveDate;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::models::DailyReportRow;

fn day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Copy `flights_raw` rows scheduled on `date` into `flights`.
pub async fn extract_flight_data(pool: &SqlitePool, date: NaiveDate) -> Result<u64> {
    let day = day(date);
    let now = chrono::Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM flights WHERE date(scheduled_departure) = ?")
        .bind(&day)
        .execute(&mut *tx)
        .await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO flights
            (flight_number, airline_code, departure_airport, arrival_airport,
             scheduled_departure, scheduled_arrival, actual_departure, actual_arrival,
             status, aircraft_type, distance_km, loaded_at)
        SELECT flight_number, airline_code, departure_airport, arrival_airport,
               scheduled_departure, scheduled_arrival, actual_departure, actual_arrival,
               status, aircraft_type, distance_km, ?
        FROM flights_raw
        WHERE date(scheduled_departure) = ?
        "#,
    )
    .bind(&now)
    .bind(&day)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    info!(date = %day, rows = inserted, "flight data extracted");
    Ok(inserted)
}

/// Copy `cargo_raw` rows created on `date` into `cargo_manifests`.
pub async fn extract_cargo_data(pool: &SqlitePool, date: NaiveDate) -> Result<u64> {
    let day = day(date);
    let now = chrono::Utc::now().to_rfc3339();

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM cargo_manifests WHERE date(created_at) = ?")
        .bind(&day)
        .execute(&mut *tx)
        .await?;
    let inserted = sqlx::query(
        r#"
        INSERT INTO cargo_manifests
            (flight_number, waybill_number, shipper_name, consignee_name, cargo_description,
             weight_kg, volume_cubic_m, special_handling, hazardous_material, hazmat_class,
             created_at, loaded_at)
        SELECT flight_number, waybill_number, shipper_name, consignee_name, cargo_description,
               weight_kg, volume_cubic_m, special_handling, hazardous_material, hazmat_class,
               created_at, ?
        FROM cargo_raw
        WHERE date(created_at) = ?
        "#,
    )
    .bind(&now)
    .bind(&day)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    info!(date = %day, rows = inserted, "cargo data extracted");
    Ok(inserted)
}

/// Rebuild `daily_operations_report` for flights scheduled on `date`.
///
/// Flights without cargo still get a row with zero shipments.
pub async fn generate_daily_report(pool: &SqlitePool, date: NaiveDate) -> Result<u64> {
    let day = day(date);

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM daily_operations_report")
        .execute(&mut *tx)
        .await?;
    let rows = sqlx::query(
        r#"
        INSERT INTO daily_operations_report
            (report_date, flight_number, airline_code, departure_airport, arrival_airport,
             status, total_shipments, total_cargo_weight, hazardous_shipments)
        SELECT ?, f.flight_number, f.airline_code, f.departure_airport, f.arrival_airport,
               f.status,
               COUNT(cm.waybill_number),
               COALESCE(SUM(cm.weight_kg), 0),
               COALESCE(SUM(CASE WHEN cm.hazardous_material THEN 1 ELSE 0 END), 0)
        FROM flights f
        LEFT JOIN cargo_manifests cm ON f.flight_number = cm.flight_number
        WHERE date(f.scheduled_departure) = ?
        GROUP BY f.flight_number, f.airline_code, f.departure_airport, f.arrival_airport, f.status
        "#,
    )
    .bind(&day)
    .bind(&day)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    info!(date = %day, rows, "daily operations report generated");
    Ok(rows)
}

pub async fn fetch_report(pool: &SqlitePool) -> Result<Vec<DailyReportRow>> {
    let rows = sqlx::query(
        "SELECT report_date, flight_number, airline_code, departure_airport, arrival_airport, \
         status, total_shipments, total_cargo_weight, hazardous_shipments \
         FROM daily_operations_report ORDER BY flight_number",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| DailyReportRow {
            report_date: row.get("report_date"),
            flight_number: row
                .get::<Option<String>, _>("flight_number")
                .unwrap_or_default(),
            airline_code: row
                .get::<Option<String>, _>("airline_code")
                .unwrap_or_default(),
            departure_airport: row
                .get::<Option<String>, _>("departure_airport")
                .unwrap_or_default(),
            arrival_airport: row
                .get::<Option<String>, _>("arrival_airport")
                .unwrap_or_default(),
            status: row.get::<Option<String>, _>("status").unwrap_or_default(),
            total_shipments: row.get("total_shipments"),
            total_cargo_weight: row.get("total_cargo_weight"),
            hazardous_shipments: row.get("hazardous_shipments"),
        })
        .collect())
}

/// CLI entry point for `avrag report`.
pub async fn run_report(config: &Config, date: NaiveDate) -> Result<()> {
    let pool = db::connect_warehouse(config).await?;
    generate_daily_report(&pool, date).await?;
    let rows = fetch_report(&pool).await?;
    pool.close().await;

    println!("daily operations report {}", day(date));
    for r in &rows {
        println!(
            "  {} {} {}->{} {}  shipments={} weight={:.2}kg hazardous={}",
            r.flight_number,
            r.airline_code,
            r.departure_airport,
            r.arrival_airport,
            r.status,
            r.total_shipments,
            r.total_cargo_weight,
            r.hazardous_shipments
        );
    }
    println!("  flights: {}", rows.len());
    Ok(())
}
