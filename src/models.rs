//! Core data models flowing through the document pipeline and the
//! warehouse read API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// A document extracted from disk, as persisted in `processed_documents`.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub filename: String,
    pub raw_text: String,
    pub source_path: String,
    pub category: Category,
    pub file_type: String,
    pub ingested_at: DateTime<Utc>,
}

impl DocumentRecord {
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "source": "aviation_docs",
            "category": self.category.as_str(),
            "file_type": self.file_type,
        })
    }
}

/// One overlapping window of a document's text; written as a JSON file
/// between the chunking and embedding stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRecord {
    pub id: String,
    pub source_document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub category: String,
    pub filename: String,
}

/// A chunk plus the vector returned by the embedding provider.
///
/// `embedding` is `None` when the provider call failed or was skipped;
/// such records are stored but never returned from similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    #[serde(flatten)]
    pub chunk: ChunkRecord,
    pub embedding: Option<Vec<f32>>,
    pub metadata: serde_json::Value,
}

/// A scored row from the vector collection.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub category: String,
    pub score: f32,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceDocument {
    pub content: String,
    pub metadata: serde_json::Value,
}

/// Answer payload of the query service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub answer: String,
    pub source_documents: Vec<SourceDocument>,
    pub question: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub flight_number: String,
    pub airline_code: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub scheduled_departure: String,
    pub scheduled_arrival: String,
    pub actual_departure: Option<String>,
    pub actual_arrival: Option<String>,
    pub status: String,
    pub aircraft_type: String,
    pub distance_km: Option<f64>,
}

/// A line of a cargo manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CargoItem {
    pub waybill_number: String,
    pub shipper_name: String,
    pub consignee_name: String,
    pub cargo_description: String,
    pub weight_kg: f64,
    pub special_handling: Option<String>,
    pub hazardous_material: bool,
}

/// A full row of `cargo_manifests`, as returned by the cargo listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CargoRecord {
    pub flight_number: String,
    pub waybill_number: String,
    pub shipper_name: String,
    pub consignee_name: String,
    pub cargo_description: String,
    pub weight_kg: f64,
    pub volume_cubic_m: Option<f64>,
    pub special_handling: Option<String>,
    pub hazardous_material: bool,
    pub hazmat_class: Option<String>,
    pub created_at: Option<String>,
}

impl CargoRecord {
    pub fn to_item(&self) -> CargoItem {
        CargoItem {
            waybill_number: self.waybill_number.clone(),
            shipper_name: self.shipper_name.clone(),
            consignee_name: self.consignee_name.clone(),
            cargo_description: self.cargo_description.clone(),
            weight_kg: self.weight_kg,
            special_handling: self.special_handling.clone(),
            hazardous_material: self.hazardous_material,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CargoManifest {
    pub flight_number: String,
    pub cargo_items: Vec<CargoItem>,
    pub total_weight_kg: f64,
    pub item_count: usize,
}

impl CargoManifest {
    /// Build a manifest; the total is the plain sum of item weights.
    pub fn from_items(flight_number: &str, cargo_items: Vec<CargoItem>) -> Self {
        Self {
            flight_number: flight_number.to_string(),
            total_weight_kg: cargo_items.iter().map(|c| c.weight_kg).sum(),
            item_count: cargo_items.len(),
            cargo_items,
        }
    }
}

/// One per-flight row of `daily_operations_report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DailyReportRow {
    pub report_date: String,
    pub flight_number: String,
    pub airline_code: String,
    pub departure_airport: String,
    pub arrival_airport: String,
    pub status: String,
    pub total_shipments: i64,
    pub total_cargo_weight: f64,
    pub hazardous_shipments: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(waybill: &str, weight_kg: f64) -> CargoItem {
        CargoItem {
            waybill_number: waybill.to_string(),
            shipper_name: "Shipper".to_string(),
            consignee_name: "Consignee".to_string(),
            cargo_description: "Goods".to_string(),
            weight_kg,
            special_handling: None,
            hazardous_material: false,
        }
    }

    #[test]
    fn manifest_totals_weights() {
        let manifest =
            CargoManifest::from_items("FX5101", vec![item("A", 4500.50), item("B", 650.25)]);
        assert_eq!(manifest.total_weight_kg, 5150.75);
        assert_eq!(manifest.item_count, 2);
        assert_eq!(manifest.flight_number, "FX5101");
    }

    #[test]
    fn manifest_total_is_not_rounded() {
        let manifest = CargoManifest::from_items(
            "5Y800",
            vec![item("A", 1.005), item("B", 2.0001)],
        );
        assert_eq!(manifest.total_weight_kg, 1.005 + 2.0001);
        assert_ne!(manifest.total_weight_kg, 3.01);
    }

    #[test]
    fn empty_manifest_is_zero() {
        let manifest = CargoManifest::from_items("XX1", Vec::new());
        assert_eq!(manifest.total_weight_kg, 0.0);
        assert_eq!(manifest.item_count, 0);
    }

    #[test]
    fn embedding_record_flattens_chunk_fields() {
        let record = EmbeddingRecord {
            chunk: ChunkRecord {
                id: "c1".to_string(),
                source_document_id: "d1".to_string(),
                chunk_index: 0,
                text: "hello".to_string(),
                category: "cargo".to_string(),
                filename: "cargo_loading.txt".to_string(),
            },
            embedding: None,
            metadata: serde_json::json!({"category": "cargo"}),
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["source_document_id"], "d1");
        assert!(value["embedding"].is_null());
    }
}
