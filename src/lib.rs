//! Funnel ETL Library
//!
//! This library ingests ad-performance and CRM opportunity feeds, joins them on
//! a normalized UTM attribution key, derives funnel/financial ratios per
//! campaign-day and serves the result from an in-memory store, with signed
//! export to a downstream sink.
//!
//! # Modules
//!
//! - `api`: API definitions.
//! - `core`: Core business logic.
//! - `integrations`: External service integrations.
//! - `config`: Configuration management.
//! - `enrichment`: Ads × CRM join and derived ratios.
//! - `errors`: Error handling types.
//! - `exporter`: Signed export to the metrics sink.
//! - `feed_client`: Feed HTTP client with retry/backoff.
//! - `handlers`: HTTP request handlers.
//! - `ingestion`: Concurrent fetch of both feeds.
//! - `models`: Feed records and enriched metrics.
//! - `repository`: Concurrent in-memory metric store.
//! - `services`: Ingestion and export pipeline.
//! - `telemetry`: Prometheus request and pipeline metrics.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod config;
pub mod enrichment;
pub mod errors;
pub mod exporter;
pub mod feed_client;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod repository;
pub mod services;
pub mod telemetry;
