use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::archive::{
    GaiaAdapter, GaiaParams, HttpTableSource, SourceAdapter, SyntheticAdapter, SyntheticParams,
    TableSource, ZtfAdapter, ZtfParams,
};
use crate::data::model::{Angle, ObjectId};
use crate::pipeline::{ChunkingPolicy, Scheduler, SchedulerConfig};

// ---------------------------------------------------------------------------
// Setup errors: fatal before any job is dispatched
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("duplicate target object_id {0}")]
    DuplicateTarget(ObjectId),
    #[error("duplicate adapter name '{0}'")]
    DuplicateAdapter(String),
    #[error("chunk count must be at least 1")]
    InvalidChunkCount,
    #[error("max_workers must be at least 1")]
    InvalidWorkerCount,
    #[error("search radius must be positive, got {0} arcsec")]
    InvalidRadius(f64),
    #[error("no adapters configured")]
    NoAdapters,
    #[error("unknown adapter '{0}'")]
    UnknownAdapter(String),
    #[error("failed to build HTTP client: {0}")]
    Transport(String),
}

// ---------------------------------------------------------------------------
// Run configuration (TOML)
// ---------------------------------------------------------------------------

/// Typed, archive-specific parameters; `archive` selects the variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "archive", rename_all = "snake_case")]
pub enum ArchiveParams {
    Gaia(GaiaParams),
    Ztf(ZtfParams),
    Synthetic(SyntheticParams),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdapterEntry {
    pub name: String,
    pub policy: ChunkingPolicy,
    /// Overrides the run-wide radius for this archive.
    pub radius_arcsec: Option<f64>,
    pub params: ArchiveParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    pub targets: Option<PathBuf>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_radius")]
    pub radius_arcsec: f64,
    pub max_workers: Option<usize>,
    pub job_timeout_secs: Option<u64>,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    #[serde(default, rename = "adapter")]
    pub adapters: Vec<AdapterEntry>,
}

fn default_output() -> PathBuf {
    PathBuf::from("lightcurves.parquet")
}

fn default_radius() -> f64 {
    1.0
}

fn default_http_timeout() -> u64 {
    120
}

impl RunConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let config: RunConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SetupError> {
        if self.adapters.is_empty() {
            return Err(SetupError::NoAdapters);
        }
        if self.max_workers == Some(0) {
            return Err(SetupError::InvalidWorkerCount);
        }
        check_radius(self.radius_arcsec)?;
        let mut names = BTreeSet::new();
        for entry in &self.adapters {
            if !names.insert(entry.name.as_str()) {
                return Err(SetupError::DuplicateAdapter(entry.name.clone()));
            }
            entry.policy.validate()?;
            if let Some(r) = entry.radius_arcsec {
                check_radius(r)?;
            }
        }
        Ok(())
    }

    /// Keep only the named adapters, in configuration order.
    pub fn select(&mut self, names: &[String]) -> Result<(), SetupError> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.adapters.iter().any(|a| &a.name == *n))
        {
            return Err(SetupError::UnknownAdapter(unknown.clone()));
        }
        self.adapters.retain(|a| names.contains(&a.name));
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_workers: self.max_workers,
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
            ..SchedulerConfig::default()
        }
    }

    /// Build a scheduler with one adapter per entry, sharing one HTTP client.
    pub fn build_scheduler(&self) -> Result<Scheduler, SetupError> {
        self.validate()?;
        let transport: Arc<dyn TableSource> = Arc::new(
            HttpTableSource::new(Duration::from_secs(self.http_timeout_secs))
                .map_err(|e| SetupError::Transport(e.to_string()))?,
        );
        self.build_scheduler_with(transport)
    }

    /// As [`RunConfig::build_scheduler`], with a caller-provided transport.
    pub fn build_scheduler_with(
        &self,
        transport: Arc<dyn TableSource>,
    ) -> Result<Scheduler, SetupError> {
        let mut scheduler = Scheduler::new(self.scheduler_config())?;
        for entry in &self.adapters {
            let adapter: Arc<dyn SourceAdapter> = match &entry.params {
                ArchiveParams::Gaia(p) => {
                    Arc::new(GaiaAdapter::new(&entry.name, p.clone(), transport.clone()))
                }
                ArchiveParams::Ztf(p) => {
                    Arc::new(ZtfAdapter::new(&entry.name, p.clone(), transport.clone()))
                }
                ArchiveParams::Synthetic(p) => {
                    Arc::new(SyntheticAdapter::new(&entry.name, p.clone()))
                }
            };
            let radius = Angle::from_arcsec(entry.radius_arcsec.unwrap_or(self.radius_arcsec));
            scheduler.add(adapter, entry.policy, radius)?;
        }
        Ok(scheduler)
    }
}

fn check_radius(arcsec: f64) -> Result<(), SetupError> {
    if arcsec > 0.0 && arcsec.is_finite() {
        Ok(())
    } else {
        Err(SetupError::InvalidRadius(arcsec))
    }
}
