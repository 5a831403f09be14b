//! Multi-archive light-curve retrieval.
//!
//! A [`data::model::TargetSet`] is fanned out to every configured
//! [`archive::SourceAdapter`] by the [`pipeline::Scheduler`]; completed
//! fragments are merged into one [`data::store::AggregationStore`] and
//! persisted through [`data::loader`].

pub mod archive;
pub mod config;
pub mod data;
pub mod pipeline;

pub use config::{RunConfig, SetupError};
pub use data::model::{Fragment, LightCurvePoint, Target, TargetSet};
pub use data::store::AggregationStore;
pub use pipeline::{RunReport, Scheduler};
