//! Data layer: core types, the aggregation store, persistence and filtering.
//!
//! Architecture:
//! ```text
//!   adapters ──► Fragment ──► merge ──► AggregationStore
//!                                            │
//!                                            ▼
//!                                      ┌──────────┐
//!                                      │  loader   │  export ⇄ .parquet / .csv / .json
//!                                      └──────────┘
//!                                            │
//!                                            ▼
//!                                      ┌──────────┐
//!                                      │  filter   │  label / band predicates → visible objects
//!                                      └──────────┘
//! ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod store;
