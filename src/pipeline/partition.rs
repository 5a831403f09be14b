use std::ops::Range;

use serde::Deserialize;

use crate::config::SetupError;

/// How an adapter's work is split across jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkingPolicy {
    /// One job over the whole Target Set.
    Single,
    /// `k` jobs over contiguous slices; for latency-bound archives.
    Chunked(usize),
}

impl ChunkingPolicy {
    /// Number of jobs (and workers) this policy asks for.
    pub fn job_count(self) -> usize {
        match self {
            ChunkingPolicy::Single => 1,
            ChunkingPolicy::Chunked(k) => k,
        }
    }

    pub fn validate(self) -> Result<(), SetupError> {
        match self {
            ChunkingPolicy::Chunked(0) => Err(SetupError::InvalidChunkCount),
            _ => Ok(()),
        }
    }
}

/// Worker budget: one per single adapter plus `k` per chunked adapter.
pub fn worker_budget<I: IntoIterator<Item = ChunkingPolicy>>(policies: I) -> usize {
    policies.into_iter().map(ChunkingPolicy::job_count).sum()
}

/// Split `0..len` into at most `k` contiguous, disjoint ranges of size
/// `ceil(len / k)`, the last possibly shorter. Ranges are never empty, so
/// fewer than `k` come back when the slices run out early (`len = 9, k = 4`
/// gives three ranges of three).
pub fn partition(len: usize, k: usize) -> Result<Vec<Range<usize>>, SetupError> {
    if k == 0 {
        return Err(SetupError::InvalidChunkCount);
    }
    if len == 0 {
        return Ok(Vec::new());
    }
    let size = len.div_ceil(k);
    Ok((0..len)
        .step_by(size)
        .map(|start| start..(start + size).min(len))
        .collect())
}

/// Target ranges for one adapter under its policy.
pub fn ranges_for(policy: ChunkingPolicy, len: usize) -> Result<Vec<Range<usize>>, SetupError> {
    match policy {
        ChunkingPolicy::Single => Ok(vec![0..len]),
        ChunkingPolicy::Chunked(k) => partition(len, k),
    }
}
