//! Analysis pipeline for counseling-board records: CSV ingestion,
//! preprocessing, topic discovery, clustering, LLM-assisted cluster
//! analysis, frequency insights, and report generation. Stages exchange
//! artifacts through the output directory, so each can be re-run alone.

pub mod analyze;
pub mod budget;
pub mod cluster;
pub mod config;
pub mod ingest;
pub mod insights;
pub mod llm;
pub mod models;
pub mod out_models;
pub mod pipeline;
pub mod preprocess;
pub mod prompts;
pub mod report;
pub mod topics;
pub mod vectorize;
pub mod viz;
