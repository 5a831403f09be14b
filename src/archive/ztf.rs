use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use super::{AdapterError, QueryContext, SourceAdapter, Table, TableSource};
use crate::data::model::{Fragment, Target, ValueKind};

const LIGHT_CURVE_URL: &str = "https://irsa.ipac.caltech.edu/cgi-bin/ZTF/nph_light_curves";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZtfParams {
    /// Filters to request: any of `g`, `r`, `i`.
    pub bands: Vec<String>,
    /// Epochs with any of these catalog flags set are dropped.
    pub bad_catflags_mask: u32,
    /// Extra attempts per target after a transient failure.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for ZtfParams {
    fn default() -> Self {
        Self {
            bands: vec!["g".into(), "r".into(), "i".into()],
            bad_catflags_mask: 32768,
            retries: 2,
            retry_delay_ms: 500,
        }
    }
}

/// ZTF light curves from the IRSA API: one request per target, so this
/// archive is latency-bound and is normally run chunked.
pub struct ZtfAdapter {
    name: String,
    params: ZtfParams,
    source: Arc<dyn TableSource>,
}

impl ZtfAdapter {
    pub fn new(name: impl Into<String>, params: ZtfParams, source: Arc<dyn TableSource>) -> Self {
        Self {
            name: name.into(),
            params,
            source,
        }
    }

    fn fetch_target(&self, target: &Target, ctx: &QueryContext) -> Result<Table, AdapterError> {
        let params = [
            (
                "POS",
                format!(
                    "CIRCLE {} {} {}",
                    target.coord.ra_deg,
                    target.coord.dec_deg,
                    ctx.radius.degrees()
                ),
            ),
            ("BANDNAME", self.params.bands.join(",")),
            ("FORMAT", "csv".to_string()),
            ("BAD_CATFLAGS_MASK", self.params.bad_catflags_mask.to_string()),
        ];

        let mut attempt = 0;
        loop {
            ctx.cancel.check()?;
            match self.source.fetch(LIGHT_CURVE_URL, &params) {
                Err(e) if e.is_transient() && attempt < self.params.retries => {
                    attempt += 1;
                    log::warn!(
                        "{}: object {} attempt {attempt} failed ({e}), retrying",
                        self.name,
                        target.object_id
                    );
                    thread::sleep(Duration::from_millis(self.params.retry_delay_ms));
                }
                other => return other,
            }
        }
    }

    fn convert(
        &self,
        target: &Target,
        table: &Table,
        fragment: &mut Fragment,
    ) -> Result<(), AdapterError> {
        if table.is_empty() {
            return Ok(());
        }
        let mjd = table.column("mjd")?;
        let mag = table.column("mag")?;
        let magerr = table.column("magerr")?;
        let filtercode = table.column("filtercode")?;
        let catflags = table.column("catflags").ok();

        for row in 0..table.len() {
            if let Some(col) = catflags {
                let flags = table.opt_f64(row, col)?.unwrap_or(0.0) as u32;
                if flags & self.params.bad_catflags_mask != 0 {
                    continue;
                }
            }
            let Some(filter) = table.str(row, filtercode).strip_prefix('z') else {
                return Err(AdapterError::Malformed(format!(
                    "unexpected filtercode '{}'",
                    table.str(row, filtercode)
                )));
            };
            let band = format!("ztf_{filter}");
            fragment.record(
                target,
                &band,
                table.f64(row, mjd)?,
                table.f64(row, mag)?,
                table.opt_f64(row, magerr)?.unwrap_or(0.0),
                ValueKind::Magnitude,
            );
        }
        Ok(())
    }
}

impl SourceAdapter for ZtfAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, targets: &[Target], ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        let mut fragment = Fragment::new();
        for target in targets {
            let table = self.fetch_target(target, ctx)?;
            self.convert(target, &table, &mut fragment)?;
        }
        Ok(fragment)
    }
}
