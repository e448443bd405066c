use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema of both stores. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let warehouse = db::connect_warehouse(config).await?;
    migrate_warehouse(&warehouse).await?;
    warehouse.close().await;

    let docstore = db::connect_docstore(config).await?;
    migrate_docstore(&docstore).await?;
    docstore.close().await;
    Ok(())
}

pub async fn migrate_warehouse(pool: &SqlitePool) -> Result<()> {
    // Staging tables fed by upstream systems
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flights_raw (
            flight_number TEXT,
            airline_code TEXT,
            departure_airport TEXT,
            arrival_airport TEXT,
            scheduled_departure TEXT,
            scheduled_arrival TEXT,
            actual_departure TEXT,
            actual_arrival TEXT,
            status TEXT,
            aircraft_type TEXT,
            distance_km REAL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cargo_raw (
            flight_number TEXT,
            waybill_number TEXT,
            shipper_name TEXT,
            consignee_name TEXT,
            cargo_description TEXT,
            weight_kg REAL,
            volume_cubic_m REAL,
            special_handling TEXT,
            hazardous_material INTEGER NOT NULL DEFAULT 0,
            hazmat_class TEXT,
            created_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Curated tables read by the API
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS flights (
            flight_number TEXT,
            airline_code TEXT,
            departure_airport TEXT,
            arrival_airport TEXT,
            scheduled_departure TEXT,
            scheduled_arrival TEXT,
            actual_departure TEXT,
            actual_arrival TEXT,
            status TEXT,
            aircraft_type TEXT,
            distance_km REAL,
            loaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cargo_manifests (
            flight_number TEXT,
            waybill_number TEXT,
            shipper_name TEXT,
            consignee_name TEXT,
            cargo_description TEXT,
            weight_kg REAL,
            volume_cubic_m REAL,
            special_handling TEXT,
            hazardous_material INTEGER NOT NULL DEFAULT 0,
            hazmat_class TEXT,
            created_at TEXT,
            loaded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS daily_operations_report (
            report_date TEXT NOT NULL,
            flight_number TEXT,
            airline_code TEXT,
            departure_airport TEXT,
            arrival_airport TEXT,
            status TEXT,
            total_shipments INTEGER NOT NULL,
            total_cargo_weight REAL NOT NULL,
            hazardous_shipments INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS external_flights (
            object_key TEXT NOT NULL,
            row_index INTEGER NOT NULL,
            record_json TEXT NOT NULL,
            loaded_at TEXT NOT NULL,
            UNIQUE(object_key, row_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_flights_departure ON flights(scheduled_departure)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_cargo_flight ON cargo_manifests(flight_number)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn migrate_docstore(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_documents (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            content TEXT NOT NULL,
            file_path TEXT NOT NULL,
            category TEXT NOT NULL,
            file_type TEXT NOT NULL,
            processed_at TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Vector-bearing collection; embedding is NULL until a provider round trip succeeds
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS embedded_documents (
            id TEXT PRIMARY KEY,
            source_document_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            filename TEXT NOT NULL,
            category TEXT NOT NULL,
            text TEXT NOT NULL,
            embedding BLOB,
            dims INTEGER,
            model TEXT,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            indexed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS search_indexes (
            name TEXT PRIMARY KEY,
            collection TEXT NOT NULL,
            path TEXT NOT NULL,
            dims INTEGER NOT NULL,
            similarity TEXT NOT NULL,
            filter_path TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_embedded_category ON embedded_documents(category)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
