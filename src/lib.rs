//! # Aviation RAG
//!
//! Retrieval-augmented question answering over aviation operations
//! documents, plus a read API for flight and cargo data held in a
//! relational warehouse.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │  Documents  │──▶│ Chunk+Embed  │──▶│ Doc store │
//! │ PDF/DOCX/TXT│   │ (files)      │   │ + vectors │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//! ┌─────────────┐   ┌──────────────┐         ▼
//! │ Staging/S3  │──▶│ ETL+quality  │   ┌───────────┐
//! └─────────────┘   │ +report      │   │ HTTP API  │
//!                   └──────┬───────┘   │ query,    │
//!                          ▼           │ flights,  │
//!                   ┌──────────────┐   │ cargo     │
//!                   │  Warehouse   │──▶│           │
//!                   └──────────────┘   └───────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! avrag init                    # create both stores
//! avrag seed                    # sample flights, cargo, documents
//! avrag pipeline daily          # ETL, quality checks, report, documents
//! avrag pipeline vectors        # chunk, embed, store, index, validate
//! avrag query "Lithium battery limits on passenger aircraft?" --context-type regulations
//! avrag serve                   # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`models`] | Core data types |
//! | [`category`] | Filename → document category rules |
//! | [`extract`] | PDF / DOCX / text extraction |
//! | [`connector_fs`] | Document directory scanning |
//! | [`ingest`] | Document ingestion into the document store |
//! | [`chunk`] | Character-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Chunk files → embedding files |
//! | [`vector_store`] | Vector storage, index, validation, search |
//! | [`generation`] | Chat model abstraction |
//! | [`rag`] | Question answering |
//! | [`warehouse`] | Flight and cargo reads |
//! | [`sample_data`] | Built-in sample data |
//! | [`report`] | Staging → curated ETL and daily report |
//! | [`quality`] | Data-quality checks |
//! | [`connector_s3`] | External CSV loader (S3) |
//! | [`aws`] | SigV4 request signing |
//! | [`pipeline`] | Workflow graphs and runner |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema migrations |
//! | [`telemetry`] | Logging setup |

pub mod aws;
pub mod category;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod connector_s3;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod quality;
pub mod rag;
pub mod report;
pub mod sample_data;
pub mod server;
pub mod telemetry;
pub mod vector_store;
pub mod warehouse;
