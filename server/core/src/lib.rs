//! # Graphloom Core
//!
//! Data model and store abstractions for the Graphloom incremental entity
//! resolution and graph-merge engine.
//!
//! This crate provides:
//! - **Data model** — [`types::Entity`], [`types::Relation`], [`types::Document`],
//!   [`types::Chunk`] and the document status state machine
//! - **Store traits** — [`backends::DocumentStore`] and [`backends::GraphStore`],
//!   the seams production backends plug into
//! - **Registry** — [`backends::StoreRegistry`] bundling both stores
//! - **In-memory stores** — [`memory::MemoryDocumentStore`] and
//!   [`memory::MemoryGraphStore`] for tests and embedded deployments
//!
//! The ingestion pipeline itself lives in the `graphloom_ingest` crate.

pub mod backends;
pub mod memory;
pub mod types;

pub use backends::*;
pub use memory::*;
pub use types::*;
