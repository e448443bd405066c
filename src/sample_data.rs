//! Built-in sample flights, cargo, and reference documents.
//!
//! Served by the HTTP API when the warehouse is unreachable (and the
//! fallback policy allows it), and loaded by `avrag seed` to populate a
//! fresh installation.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db;
use crate::models::{CargoManifest, CargoRecord, Flight};

/// Advisory attached to responses that carry sample data.
pub const FALLBACK_NOTE: &str = "Using sample data due to backend issue";

pub fn sample_flights() -> Vec<Flight> {
    vec![
        Flight {
            flight_number: "UA901".to_string(),
            airline_code: "UAL".to_string(),
            departure_airport: "JFK".to_string(),
            arrival_airport: "LHR".to_string(),
            scheduled_departure: "2024-01-15T18:30:00".to_string(),
            scheduled_arrival: "2024-01-16T06:45:00".to_string(),
            actual_departure: Some("2024-01-15T18:45:00".to_string()),
            actual_arrival: Some("2024-01-16T07:00:00".to_string()),
            status: "ARRIVED".to_string(),
            aircraft_type: "Boeing 777-300ER".to_string(),
            distance_km: Some(5534.0),
        },
        Flight {
            flight_number: "BA117".to_string(),
            airline_code: "BAW".to_string(),
            departure_airport: "LHR".to_string(),
            arrival_airport: "DXB".to_string(),
            scheduled_departure: "2024-01-15T20:15:00".to_string(),
            scheduled_arrival: "2024-01-16T07:30:00".to_string(),
            actual_departure: Some("2024-01-15T20:30:00".to_string()),
            actual_arrival: Some("2024-01-16T07:45:00".to_string()),
            status: "ARRIVED".to_string(),
            aircraft_type: "Airbus A380".to_string(),
            distance_km: Some(5490.0),
        },
    ]
}

#[allow(clippy::too_many_arguments)]
fn cargo(
    flight_number: &str,
    waybill_number: &str,
    shipper_name: &str,
    consignee_name: &str,
    cargo_description: &str,
    weight_kg: f64,
    volume_cubic_m: f64,
    special_handling: &str,
    hazmat_class: Option<&str>,
    created_at: &str,
) -> CargoRecord {
    CargoRecord {
        flight_number: flight_number.to_string(),
        waybill_number: waybill_number.to_string(),
        shipper_name: shipper_name.to_string(),
        consignee_name: consignee_name.to_string(),
        cargo_description: cargo_description.to_string(),
        weight_kg,
        volume_cubic_m: Some(volume_cubic_m),
        special_handling: Some(special_handling.to_string()),
        hazardous_material: hazmat_class.is_some(),
        hazmat_class: hazmat_class.map(|c| c.to_string()),
        created_at: Some(created_at.to_string()),
    }
}

pub fn sample_cargo() -> Vec<CargoRecord> {
    vec![
        cargo(
            "FX5101",
            "FX7894561230",
            "MedTech Solutions Inc.",
            "Alaska Medical Supplies",
            "Medical equipment and supplies",
            4500.50,
            12.5,
            "TEMPERATURE_CONTROLLED",
            None,
            "2024-01-15T10:00:00",
        ),
        cargo(
            "FX5101",
            "FX7894561231",
            "ElectroCorp International",
            "Northern Electronics Distributors",
            "Consumer electronics - smartphones and tablets",
            3200.75,
            8.2,
            "FRAGILE",
            None,
            "2024-01-15T10:15:00",
        ),
        cargo(
            "5Y800",
            "5Y20240115001",
            "AutoParts Manufacturing",
            "Shanghai Automotive Group",
            "Automotive parts and components",
            18500.00,
            45.8,
            "HEAVY",
            None,
            "2024-01-15T14:30:00",
        ),
        cargo(
            "5Y800",
            "5Y20240115002",
            "ChemTech Laboratories",
            "Shanghai Pharmaceutical Co.",
            "Lithium-ion batteries for medical devices",
            650.25,
            2.1,
            "DANGEROUS_GOODS",
            Some("Class 9"),
            "2024-01-15T15:00:00",
        ),
        cargo(
            "UA901",
            "UA20240115001",
            "FreshFoods Exporters",
            "London Gourmet Markets",
            "Fresh seafood and perishable foods",
            2800.00,
            15.3,
            "PERISHABLE",
            None,
            "2024-01-15T16:00:00",
        ),
        cargo(
            "SQ305",
            "SQ20240116001",
            "Singapore Electronics",
            "Sydney Tech Distributors",
            "High-value electronics and components",
            4200.75,
            9.6,
            "HIGH_VALUE",
            None,
            "2024-01-16T08:00:00",
        ),
        cargo(
            "BA117",
            "BA20240115001",
            "UK Pharmaceuticals Ltd",
            "Dubai Medical Center",
            "Pharmaceutical supplies and vaccines",
            1800.25,
            6.8,
            "TEMPERATURE_CONTROLLED",
            None,
            "2024-01-15T18:00:00",
        ),
        cargo(
            "EK202",
            "EK20240116001",
            "Middle East Logistics",
            "Singapore Trading Co.",
            "Industrial machinery parts",
            7500.00,
            22.5,
            "HEAVY",
            None,
            "2024-01-16T01:00:00",
        ),
    ]
}

/// Manifest built from the sample cargo for one flight.
pub fn sample_manifest(flight_number: &str) -> CargoManifest {
    let items = sample_cargo()
        .iter()
        .filter(|c| c.flight_number == flight_number)
        .map(CargoRecord::to_item)
        .collect();
    CargoManifest::from_items(flight_number, items)
}

/// Reference documents as `(file name, text)`. File names are chosen so the
/// set covers every category.
pub fn sample_documents() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "iata_dgr_lithium_batteries.txt",
            "DANGEROUS GOODS REGULATIONS FOR LITHIUM BATTERIES - IATA DGR SECTION II\n\n\
             Lithium-ion batteries must be shipped at a state of charge not exceeding 30% of their rated capacity.\n\
             Batteries must be packed in strong, rigid packaging and protected against short circuit.\n\
             Passenger aircraft: Maximum net quantity of 5 kg per package.\n\
             Cargo aircraft: Maximum net quantity of 35 kg per package.\n\
             All packages must be marked with \"Lithium Ion Batteries\" and Class 9 hazard label.\n\
             For defective or damaged batteries, special approval from the appropriate authority is required.\n\
             Batteries must be separated to prevent short circuits and packed to prevent movement within the package.",
        ),
        (
            "b777_cargo_loading_manual.txt",
            "AIRCRAFT LOADING PROCEDURES FOR BOEING 777-300ER\n\n\
             Maximum Zero Fuel Weight: 230,000 kg\n\
             Maximum Takeoff Weight: 351,500 kg\n\
             Maximum Landing Weight: 251,000 kg\n\n\
             LOADING PRINCIPLES:\n\
             - Ensure proper weight and balance calculations before loading\n\
             - Cargo must be properly secured using approved restraint systems\n\
             - Load distribution should maintain center of gravity within limits\n\
             - Special care required for live animals and perishable goods\n\
             - Dangerous goods must be loaded according to segregation requirements\n\
             - ULDs (Unit Load Devices) must be properly positioned and locked\n\n\
             BALANCE LIMITS:\n\
             - Forward CG limit: 15% MAC\n\
             - Aft CG limit: 35% MAC\n\
             - Optimal CG range: 20-30% MAC",
        ),
        (
            "flight_delay_protocol.txt",
            "FLIGHT DELAY MANAGEMENT PROTOCOL - AIRLINE OPERATIONS MANUAL CHAPTER 7\n\n\
             DELAY 0-2 HOURS: provide passengers with refreshments, communicate updates every 30 minutes, \
             coordinate with ground handling for basic services.\n\
             DELAY 2-4 HOURS: arrange meal services, provide access to communication facilities, \
             update passenger manifests for customs.\n\
             DELAY EXCEEDS 4 HOURS: arrange hotel accommodation if necessary, provide transportation to and from \
             the hotel, process refunds or rebooking as per policy, coordinate with immigration for overnight stays.\n\n\
             COMMUNICATION PROTOCOL:\n\
             - Announce delay reasons and updated departure times every 30 minutes\n\
             - Designate staff to handle passenger inquiries\n\
             - Update flight information display systems\n\
             - Notify connecting flight operations",
        ),
        (
            "cargo_security_protocols.txt",
            "CARGO SECURITY PROTOCOLS - TSA AND ICAO STANDARDS\n\n\
             SECURITY SCREENING REQUIREMENTS:\n\
             1. All cargo must be screened before loading\n\
             2. Known consignor program for regular shippers\n\
             3. Screening methods: X-ray, EDS, physical search, canine\n\
             4. High-risk cargo requires enhanced screening\n\n\
             DOCUMENTATION REQUIREMENTS:\n\
             - Air Waybill with complete shipper/consignee information\n\
             - Security declaration form\n\
             - Dangerous goods declaration if applicable\n\
             - Export licenses for restricted items\n\n\
             ACCESS CONTROL:\n\
             - Cargo areas restricted to authorized personnel only\n\
             - Background checks for cargo handling staff\n\
             - Surveillance systems in cargo facilities\n\
             - Chain of custody documentation",
        ),
        (
            "winter_deicing_safety.txt",
            "AIRCRAFT DEICING PROCEDURES - WINTER OPERATIONS\n\n\
             DEICING FLUIDS:\n\
             - Type I: Unthickened fluid for deicing\n\
             - Type II/IV: Thickened fluid for anti-icing\n\
             - Holdover time tables must be consulted\n\n\
             PROCEDURES:\n\
             1. Pre-flight inspection for ice accumulation\n\
             2. Deicing before departure if contamination exists\n\
             3. One-step or two-step process based on conditions\n\
             4. Communication between flight crew and deicing crew\n\
             5. Post-deicing inspection\n\n\
             SAFETY PRECAUTIONS:\n\
             - Safe distance from aircraft during operations\n\
             - Proper personal protective equipment\n\
             - Environmental protection measures\n\
             - Coordination with air traffic control",
        ),
    ]
}

/// Write the sample documents into `dir`, returning the written paths.
pub fn write_sample_documents(dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create document dir: {}", dir.display()))?;
    let mut written = Vec::new();
    for (name, text) in sample_documents() {
        let path = dir.join(name);
        std::fs::write(&path, text)?;
        written.push(path);
    }
    Ok(written)
}

/// CLI entry point for `avrag seed`.
///
/// Loads the sample rows into the staging tables (or straight into the
/// curated tables with `curated`) and writes the sample documents into the
/// first configured document path.
pub async fn run_seed(config: &Config, curated: bool) -> Result<()> {
    let pool = db::connect_warehouse(config).await?;
    let (flights, cargo) = if curated {
        load_curated(&pool).await?
    } else {
        load_staging(&pool).await?
    };
    pool.close().await;

    let docs = match config.documents.paths.first() {
        Some(dir) => write_sample_documents(dir)?.len(),
        None => {
            tracing::warn!("no [documents] paths configured, sample documents not written");
            0
        }
    };

    println!("seed sample data");
    println!(
        "  target: {}",
        if curated { "curated tables" } else { "staging tables" }
    );
    println!("  flights: {}", flights);
    println!("  cargo: {}", cargo);
    println!("  documents: {}", docs);
    println!("ok");
    Ok(())
}

/// Insert the sample rows into the staging tables (`flights_raw`, `cargo_raw`).
pub async fn load_staging(pool: &SqlitePool) -> Result<(usize, usize)> {
    insert_flights(pool, "flights_raw", None).await?;
    insert_cargo(pool, "cargo_raw", None).await?;
    Ok((sample_flights().len(), sample_cargo().len()))
}

/// Insert the sample rows straight into the curated tables.
pub async fn load_curated(pool: &SqlitePool) -> Result<(usize, usize)> {
    let now = chrono::Utc::now().to_rfc3339();
    insert_flights(pool, "flights", Some(&now)).await?;
    insert_cargo(pool, "cargo_manifests", Some(&now)).await?;
    Ok((sample_flights().len(), sample_cargo().len()))
}

async fn insert_flights(pool: &SqlitePool, table: &str, loaded_at: Option<&str>) -> Result<()> {
    let mut tx = pool.begin().await?;
    for f in sample_flights() {
        let sql = match loaded_at {
            Some(_) => format!(
                "INSERT INTO {} (flight_number, airline_code, departure_airport, arrival_airport, \
                 scheduled_departure, scheduled_arrival, actual_departure, actual_arrival, status, \
                 aircraft_type, distance_km, loaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                table
            ),
            None => format!(
                "INSERT INTO {} (flight_number, airline_code, departure_airport, arrival_airport, \
                 scheduled_departure, scheduled_arrival, actual_departure, actual_arrival, status, \
                 aircraft_type, distance_km) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                table
            ),
        };
        let mut query = sqlx::query(&sql)
            .bind(&f.flight_number)
            .bind(&f.airline_code)
            .bind(&f.departure_airport)
            .bind(&f.arrival_airport)
            .bind(&f.scheduled_departure)
            .bind(&f.scheduled_arrival)
            .bind(&f.actual_departure)
            .bind(&f.actual_arrival)
            .bind(&f.status)
            .bind(&f.aircraft_type)
            .bind(f.distance_km);
        if let Some(ts) = loaded_at {
            query = query.bind(ts);
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_cargo(pool: &SqlitePool, table: &str, loaded_at: Option<&str>) -> Result<()> {
    let mut tx = pool.begin().await?;
    for c in sample_cargo() {
        let sql = match loaded_at {
            Some(_) => format!(
                "INSERT INTO {} (flight_number, waybill_number, shipper_name, consignee_name, \
                 cargo_description, weight_kg, volume_cubic_m, special_handling, hazardous_material, \
                 hazmat_class, created_at, loaded_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                table
            ),
            None => format!(
                "INSERT INTO {} (flight_number, waybill_number, shipper_name, consignee_name, \
                 cargo_description, weight_kg, volume_cubic_m, special_handling, hazardous_material, \
                 hazmat_class, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                table
            ),
        };
        let mut query = sqlx::query(&sql)
            .bind(&c.flight_number)
            .bind(&c.waybill_number)
            .bind(&c.shipper_name)
            .bind(&c.consignee_name)
            .bind(&c.cargo_description)
            .bind(c.weight_kg)
            .bind(c.volume_cubic_m)
            .bind(&c.special_handling)
            .bind(c.hazardous_material as i64)
            .bind(&c.hazmat_class)
            .bind(&c.created_at);
        if let Some(ts) = loaded_at {
            query = query.bind(ts);
        }
        query.execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{categorize, Category};

    #[test]
    fn two_fully_populated_sample_flights() {
        let flights = sample_flights();
        assert_eq!(flights.len(), 2);
        for f in &flights {
            assert!(!f.flight_number.is_empty());
            assert!(!f.airline_code.is_empty());
            assert!(!f.departure_airport.is_empty());
            assert!(!f.arrival_airport.is_empty());
            assert!(!f.scheduled_departure.is_empty());
            assert!(!f.scheduled_arrival.is_empty());
            assert!(f.actual_departure.is_some());
            assert!(f.actual_arrival.is_some());
            assert!(!f.status.is_empty());
            assert!(!f.aircraft_type.is_empty());
            assert!(f.distance_km.is_some());
        }
    }

    #[test]
    fn sample_manifest_filters_by_flight() {
        let manifest = sample_manifest("5Y800");
        assert_eq!(manifest.item_count, 2);
        assert_eq!(manifest.total_weight_kg, 19150.25);
        assert!(manifest.cargo_items.iter().any(|c| c.hazardous_material));

        assert_eq!(sample_manifest("NOPE").item_count, 0);
    }

    #[test]
    fn only_lithium_shipment_is_hazardous() {
        let hazardous: Vec<_> = sample_cargo()
            .into_iter()
            .filter(|c| c.hazardous_material)
            .collect();
        assert_eq!(hazardous.len(), 1);
        assert_eq!(hazardous[0].hazmat_class.as_deref(), Some("Class 9"));
    }

    #[test]
    fn sample_documents_cover_categories() {
        let categories: Vec<Category> = sample_documents()
            .iter()
            .map(|(name, _)| categorize(name))
            .collect();
        assert!(categories.contains(&Category::Regulations));
        assert!(categories.contains(&Category::Cargo));
        assert!(categories.contains(&Category::Safety));
        assert!(categories.contains(&Category::General));
    }
}
