//! Read-only access to the flight and cargo warehouse.
//!
//! [`Warehouse`] owns a lazily opened connection pool. When the pool is
//! missing or a query fails with a connection-class error, the handle is
//! dropped and the next call reconnects. Every read returns a
//! [`WarehouseError`] on failure; substituting sample data is left to the
//! caller.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

use crate::config::Config;
use crate::db;
use crate::models::{CargoItem, CargoManifest, CargoRecord, Flight};

pub const FLIGHT_LIMIT: i64 = 50;
pub const CARGO_LIMIT: i64 = 100;

#[derive(Debug, Error)]
pub enum WarehouseError {
    #[error("warehouse connection is not configured")]
    NotConfigured,
    #[error("warehouse connection failed: {0}")]
    Connection(String),
    #[error("warehouse query failed: {0}")]
    Query(String),
}

impl WarehouseError {
    fn from_sqlx(e: sqlx::Error) -> Self {
        if is_connection_error(&e) {
            WarehouseError::Connection(e.to_string())
        } else {
            WarehouseError::Query(e.to_string())
        }
    }
}

fn is_connection_error(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
    )
}

pub struct Warehouse {
    path: Option<PathBuf>,
    pool: RwLock<Option<SqlitePool>>,
}

impl Warehouse {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            pool: RwLock::new(None),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Some(config.warehouse.path.clone()))
    }

    /// A handle with no connection parameters; every read fails.
    pub fn unconfigured() -> Self {
        Self::new(None)
    }

    async fn pool(&self) -> Result<SqlitePool, WarehouseError> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }

        let path = self.path.as_ref().ok_or(WarehouseError::NotConfigured)?;
        let mut guard = self.pool.write().await;
        if let Some(pool) = guard.as_ref() {
            return Ok(pool.clone());
        }
        let pool = db::open_existing(path)
            .await
            .map_err(|e| WarehouseError::Connection(format!("{:#}", e)))?;
        *guard = Some(pool.clone());
        Ok(pool)
    }

    /// Drop the pool so the next request reconnects.
    pub async fn reset(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
        }
    }

    async fn fail(&self, e: sqlx::Error) -> WarehouseError {
        let err = WarehouseError::from_sqlx(e);
        if matches!(err, WarehouseError::Connection(_)) {
            warn!(error = %err, "warehouse connection lost, resetting");
            self.reset().await;
        }
        err
    }

    /// Flights ordered by scheduled departure, at most [`FLIGHT_LIMIT`].
    ///
    /// `date` is matched against the calendar date of `scheduled_departure`.
    pub async fn flights(
        &self,
        flight_number: Option<&str>,
        date: Option<&str>,
    ) -> Result<Vec<Flight>, WarehouseError> {
        let pool = self.pool().await?;

        let mut sql = String::from(
            "SELECT flight_number, airline_code, departure_airport, arrival_airport, \
             scheduled_departure, scheduled_arrival, actual_departure, actual_arrival, \
             status, aircraft_type, distance_km FROM flights WHERE 1=1",
        );
        if flight_number.is_some() {
            sql.push_str(" AND flight_number = ?");
        }
        if date.is_some() {
            sql.push_str(" AND date(scheduled_departure) = ?");
        }
        sql.push_str(" ORDER BY scheduled_departure LIMIT ?");

        let mut query = sqlx::query(&sql);
        if let Some(f) = flight_number {
            query = query.bind(f);
        }
        if let Some(d) = date {
            query = query.bind(d);
        }
        query = query.bind(FLIGHT_LIMIT);

        let rows = match query.fetch_all(&pool).await {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e).await),
        };
        rows.iter()
            .map(flight_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WarehouseError::from_sqlx)
    }

    /// The manifest for one flight; unknown flights give an empty manifest.
    pub async fn cargo_for_flight(
        &self,
        flight_number: &str,
    ) -> Result<CargoManifest, WarehouseError> {
        let pool = self.pool().await?;
        let rows = match sqlx::query(
            "SELECT waybill_number, shipper_name, consignee_name, cargo_description, \
             weight_kg, special_handling, hazardous_material \
             FROM cargo_manifests WHERE flight_number = ? ORDER BY waybill_number",
        )
        .bind(flight_number)
        .fetch_all(&pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e).await),
        };

        let items = rows
            .iter()
            .map(cargo_item_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WarehouseError::from_sqlx)?;
        Ok(CargoManifest::from_items(flight_number, items))
    }

    /// Every cargo row, at most [`CARGO_LIMIT`].
    pub async fn all_cargo(&self) -> Result<Vec<CargoRecord>, WarehouseError> {
        let pool = self.pool().await?;
        let rows = match sqlx::query(
            "SELECT flight_number, waybill_number, shipper_name, consignee_name, \
             cargo_description, weight_kg, volume_cubic_m, special_handling, \
             hazardous_material, hazmat_class, created_at \
             FROM cargo_manifests ORDER BY flight_number, waybill_number LIMIT ?",
        )
        .bind(CARGO_LIMIT)
        .fetch_all(&pool)
        .await
        {
            Ok(rows) => rows,
            Err(e) => return Err(self.fail(e).await),
        };

        rows.iter()
            .map(cargo_record_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WarehouseError::from_sqlx)
    }
}

fn text(row: &SqliteRow, col: &str) -> Result<String, sqlx::Error> {
    Ok(row.try_get::<Option<String>, _>(col)?.unwrap_or_default())
}

fn flight_from_row(row: &SqliteRow) -> Result<Flight, sqlx::Error> {
    Ok(Flight {
        flight_number: text(row, "flight_number")?,
        airline_code: text(row, "airline_code")?,
        departure_airport: text(row, "departure_airport")?,
        arrival_airport: text(row, "arrival_airport")?,
        scheduled_departure: text(row, "scheduled_departure")?,
        scheduled_arrival: text(row, "scheduled_arrival")?,
        actual_departure: row.try_get("actual_departure")?,
        actual_arrival: row.try_get("actual_arrival")?,
        status: text(row, "status")?,
        aircraft_type: text(row, "aircraft_type")?,
        distance_km: row.try_get("distance_km")?,
    })
}

fn cargo_item_from_row(row: &SqliteRow) -> Result<CargoItem, sqlx::Error> {
    Ok(CargoItem {
        waybill_number: text(row, "waybill_number")?,
        shipper_name: text(row, "shipper_name")?,
        consignee_name: text(row, "consignee_name")?,
        cargo_description: text(row, "cargo_description")?,
        weight_kg: row.try_get::<Option<f64>, _>("weight_kg")?.unwrap_or(0.0),
        special_handling: row.try_get("special_handling")?,
        hazardous_material: row.try_get::<i64, _>("hazardous_material")? != 0,
    })
}

fn cargo_record_from_row(row: &SqliteRow) -> Result<CargoRecord, sqlx::Error> {
    Ok(CargoRecord {
        flight_number: text(row, "flight_number")?,
        waybill_number: text(row, "waybill_number")?,
        shipper_name: text(row, "shipper_name")?,
        consignee_name: text(row, "consignee_name")?,
        cargo_description: text(row, "cargo_description")?,
        weight_kg: row.try_get::<Option<f64>, _>("weight_kg")?.unwrap_or(0.0),
        volume_cubic_m: row.try_get("volume_cubic_m")?,
        special_handling: row.try_get("special_handling")?,
        hazardous_material: row.try_get::<i64, _>("hazardous_material")? != 0,
        hazmat_class: row.try_get("hazmat_class")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate_warehouse;
    use crate::sample_data;
    use tempfile::TempDir;

    async fn seeded(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("warehouse.sqlite");
        let pool = db::open(&path).await.unwrap();
        migrate_warehouse(&pool).await.unwrap();
        sample_data::load_curated(&pool).await.unwrap();
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn unconfigured_handle_errors() {
        let wh = Warehouse::unconfigured();
        assert!(matches!(
            wh.flights(None, None).await,
            Err(WarehouseError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn missing_database_is_a_connection_error() {
        let dir = TempDir::new().unwrap();
        let wh = Warehouse::new(Some(dir.path().join("absent.sqlite")));
        assert!(matches!(
            wh.all_cargo().await,
            Err(WarehouseError::Connection(_))
        ));
        // the file must not have been created by the read path
        assert!(!dir.path().join("absent.sqlite").exists());
    }

    #[tokio::test]
    async fn flights_filter_and_order() {
        let dir = TempDir::new().unwrap();
        let wh = Warehouse::new(Some(seeded(&dir).await));

        let all = wh.flights(None, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].scheduled_departure <= all[1].scheduled_departure);

        let ua = wh.flights(Some("UA901"), None).await.unwrap();
        assert_eq!(ua.len(), 1);
        assert_eq!(ua[0].departure_airport, "JFK");

        let dated = wh.flights(None, Some("2024-01-15")).await.unwrap();
        assert_eq!(dated.len(), 2);
        let none = wh.flights(None, Some("2023-12-31")).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn manifest_totals_come_from_rows() {
        let dir = TempDir::new().unwrap();
        let path = seeded(&dir).await;
        let wh = Warehouse::new(Some(path));

        let manifest = wh.cargo_for_flight("FX5101").await.unwrap();
        assert_eq!(manifest.item_count, 2);
        assert_eq!(manifest.total_weight_kg, 7701.25);

        let hazmat = wh.cargo_for_flight("5Y800").await.unwrap();
        assert!(hazmat.cargo_items.iter().any(|c| c.hazardous_material));

        let empty = wh.cargo_for_flight("ZZ000").await.unwrap();
        assert_eq!(empty.item_count, 0);

        let all = wh.all_cargo().await.unwrap();
        assert_eq!(all.len(), sample_data::sample_cargo().len());
    }

    #[tokio::test]
    async fn reset_forces_reconnect() {
        let dir = TempDir::new().unwrap();
        let wh = Warehouse::new(Some(seeded(&dir).await));
        assert_eq!(wh.flights(None, None).await.unwrap().len(), 2);
        wh.reset().await;
        assert!(wh.pool.read().await.is_none());
        assert_eq!(wh.flights(None, None).await.unwrap().len(), 2);
    }
}
