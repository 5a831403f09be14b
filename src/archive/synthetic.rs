use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use super::{AdapterError, QueryContext, SourceAdapter};
use crate::data::model::{Fragment, Target, ValueKind};

/// Settings for the offline archive.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyntheticParams {
    /// Band names are `<prefix>_<band>`.
    pub prefix: String,
    pub bands: Vec<String>,
    pub epochs: usize,
    pub start_mjd: f64,
    pub span_days: f64,
    /// Fraction of targets that have a counterpart, in `[0, 1]`.
    pub match_fraction: f64,
    pub seed: u64,
    /// Simulated round-trip time per target.
    pub latency_ms: u64,
}

impl Default for SyntheticParams {
    fn default() -> Self {
        Self {
            prefix: "synth".to_string(),
            bands: vec!["g".into(), "r".into()],
            epochs: 50,
            start_mjd: 58_000.0,
            span_days: 1_000.0,
            match_fraction: 1.0,
            seed: 42,
            latency_ms: 0,
        }
    }
}

/// Deterministic, network-free archive: a noisy sinusoid per object and band.
///
/// Output depends only on the seed and each target's id, so splitting the
/// target list into chunks never changes the points produced.
pub struct SyntheticAdapter {
    name: String,
    params: SyntheticParams,
}

impl SyntheticAdapter {
    pub fn new(name: impl Into<String>, params: SyntheticParams) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    fn curve(&self, target: &Target, band_index: usize, band: &str, fragment: &mut Fragment) {
        let p = &self.params;
        let mut rng = SimpleRng::seeded(&[p.seed, target.object_id.0, band_index as u64]);
        let baseline = 0.5 + 4.5 * rng.uniform();
        let amplitude = 0.3 * rng.uniform();
        let period = 50.0 + 400.0 * rng.uniform();
        let noise = 0.02 * baseline;
        let step = p.span_days / p.epochs.max(1) as f64;

        for i in 0..p.epochs {
            let t = p.start_mjd + step * (i as f64 + rng.uniform());
            let phase = TAU * (t - p.start_mjd) / period;
            let value = baseline * (1.0 + amplitude * phase.sin()) + rng.normal(noise);
            fragment.record(target, band, t, value, noise, ValueKind::Flux);
        }
    }

    fn has_counterpart(&self, target: &Target) -> bool {
        let mut rng = SimpleRng::seeded(&[self.params.seed, target.object_id.0, u64::MAX]);
        rng.uniform() < self.params.match_fraction
    }
}

impl SourceAdapter for SyntheticAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, targets: &[Target], ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        let mut fragment = Fragment::new();
        for target in targets {
            ctx.cancel.check()?;
            if self.params.latency_ms > 0 {
                thread::sleep(Duration::from_millis(self.params.latency_ms));
            }
            if !self.has_counterpart(target) {
                continue;
            }
            for (i, band) in self.params.bands.iter().enumerate() {
                let band = format!("{}_{band}", self.params.prefix);
                self.curve(target, i, &band, &mut fragment);
            }
        }
        Ok(fragment)
    }
}

/// xoshiro256** over a splitmix64-expanded seed. Each (seed, object, band)
/// key gets its own stream.
struct SimpleRng {
    s: [u64; 4],
}

impl SimpleRng {
    fn seeded(key: &[u64]) -> Self {
        let mut z = key.iter().fold(0u64, |acc, &k| splitmix64(acc ^ k));
        let s = std::array::from_fn(|_| {
            z = splitmix64(z);
            z
        });
        Self { s }
    }

    fn next_u64(&mut self) -> u64 {
        let s = &mut self.s;
        let out = s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = s[1] << 17;
        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= t;
        s[3] = s[3].rotate_left(45);
        out
    }

    /// Uniform in `[0, 1)`.
    fn uniform(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Zero-mean normal deviate (Box-Muller).
    fn normal(&mut self, sigma: f64) -> f64 {
        let r = (-2.0 * (1.0 - self.uniform()).ln()).sqrt();
        sigma * r * (TAU * self.uniform()).cos()
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
