use std::collections::BTreeMap;
use std::f64::consts::LN_10;
use std::sync::Arc;

use serde::Deserialize;

use super::{AdapterError, QueryContext, SourceAdapter, Table, TableSource};
use crate::data::model::{Fragment, Target, ValueKind};

const TAP_SYNC_URL: &str = "https://gea.esac.esa.int/tap-server/tap/sync";
const DATALINK_URL: &str = "https://gea.esac.esa.int/data-server/data";

/// Gaia epoch-photometry times are days since JD 2455197.5.
const GAIA_TIME_ZERO_JD: f64 = 2_455_197.5;
const MJD_ZERO_JD: f64 = 2_400_000.5;

/// Mean epoch of multi-epoch Gaia observations (2015-09-24T19:40:33.468),
/// used when only median photometry exists.
const MEDIAN_PHOTOMETRY_MJD: f64 = 57_289.819_831_805_6;

const BANDS: [(&str, &str); 3] = [("G", "gaia_g"), ("BP", "gaia_bp"), ("RP", "gaia_rp")];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GaiaParams {
    pub source_table: String,
    /// Nearest cone-search hit is accepted only within this distance.
    pub match_radius_arcsec: f64,
    pub data_release: String,
}

impl Default for GaiaParams {
    fn default() -> Self {
        Self {
            source_table: "gaiadr3.gaia_source".to_string(),
            match_radius_arcsec: 1.0,
            data_release: "Gaia DR3".to_string(),
        }
    }
}

/// Median photometry of the source matched to one target.
#[derive(Debug, Clone, PartialEq)]
struct MedianPhotometry {
    source_id: i64,
    /// Per band: (mean mag, mag error from the flux error ratio).
    bands: BTreeMap<&'static str, (f64, f64)>,
}

/// Gaia: cone search per target, then epoch photometry for all matches in
/// one DataLink request.
pub struct GaiaAdapter {
    name: String,
    params: GaiaParams,
    source: Arc<dyn TableSource>,
}

impl GaiaAdapter {
    pub fn new(name: impl Into<String>, params: GaiaParams, source: Arc<dyn TableSource>) -> Self {
        Self {
            name: name.into(),
            params,
            source,
        }
    }

    fn cone_search(
        &self,
        target: &Target,
        ctx: &QueryContext,
    ) -> Result<Option<MedianPhotometry>, AdapterError> {
        let ra = target.coord.ra_deg;
        let dec = target.coord.dec_deg;
        let query = format!(
            "SELECT source_id, \
             phot_g_mean_mag, phot_bp_mean_mag, phot_rp_mean_mag, \
             phot_g_mean_flux, phot_g_mean_flux_error, \
             phot_bp_mean_flux, phot_bp_mean_flux_error, \
             phot_rp_mean_flux, phot_rp_mean_flux_error, \
             DISTANCE(POINT('ICRS', ra, dec), POINT('ICRS', {ra}, {dec})) AS dist \
             FROM {table} \
             WHERE 1 = CONTAINS(POINT('ICRS', ra, dec), CIRCLE('ICRS', {ra}, {dec}, {r})) \
             ORDER BY dist ASC",
            table = self.params.source_table,
            r = ctx.radius.degrees(),
        );
        let table = self.source.fetch(
            TAP_SYNC_URL,
            &[
                ("REQUEST", "doQuery".to_string()),
                ("LANG", "ADQL".to_string()),
                ("FORMAT", "csv".to_string()),
                ("QUERY", query),
            ],
        )?;
        nearest_match(&table, self.params.match_radius_arcsec)
    }

    fn epoch_photometry(&self, source_ids: &[i64]) -> Result<Table, AdapterError> {
        if source_ids.is_empty() {
            return Ok(Table::default());
        }
        let ids: Vec<String> = source_ids.iter().map(i64::to_string).collect();
        self.source.fetch(
            DATALINK_URL,
            &[
                ("RETRIEVAL_TYPE", "EPOCH_PHOTOMETRY".to_string()),
                ("DATA_RELEASE", self.params.data_release.clone()),
                ("DATA_STRUCTURE", "COMBINED".to_string()),
                ("FORMAT", "csv".to_string()),
                ("ID", ids.join(",")),
            ],
        )
    }
}

impl SourceAdapter for GaiaAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn query(&self, targets: &[Target], ctx: &QueryContext) -> Result<Fragment, AdapterError> {
        let mut matches: Vec<(&Target, MedianPhotometry)> = Vec::new();
        for target in targets {
            ctx.cancel.check()?;
            if let Some(phot) = self.cone_search(target, ctx)? {
                matches.push((target, phot));
            }
        }
        log::info!(
            "{}: matched {} of {} targets",
            self.name,
            matches.len(),
            targets.len()
        );

        ctx.cancel.check()?;
        let ids: Vec<i64> = matches.iter().map(|(_, p)| p.source_id).collect();
        let epochs = self.epoch_photometry(&ids)?;
        let epochs = group_epochs(&epochs)?;

        let mut fragment = Fragment::new();
        for (target, median) in &matches {
            match epochs.get(&median.source_id) {
                Some(rows) => {
                    for row in rows {
                        let (value, error) = mag_to_mjy(row.mag, row.mag_error);
                        fragment.record(target, row.band, row.mjd, value, error, ValueKind::Flux);
                    }
                }
                None => {
                    for (band, (mag, mag_error)) in &median.bands {
                        let (value, error) = mag_to_mjy(*mag, *mag_error);
                        fragment.record(
                            target,
                            band,
                            MEDIAN_PHOTOMETRY_MJD,
                            value,
                            error,
                            ValueKind::Flux,
                        );
                    }
                }
            }
        }
        Ok(fragment)
    }
}

// ---------------------------------------------------------------------------
// Table conversion
// ---------------------------------------------------------------------------

/// Pick the closest source if it lies within `match_radius_arcsec`.
fn nearest_match(
    table: &Table,
    match_radius_arcsec: f64,
) -> Result<Option<MedianPhotometry>, AdapterError> {
    if table.is_empty() {
        return Ok(None);
    }
    let dist = table.column("dist")?;
    let mut best: Option<(usize, f64)> = None;
    for row in 0..table.len() {
        let Some(d) = table.opt_f64(row, dist)? else {
            continue;
        };
        if best.map_or(true, |(_, b)| d < b) {
            best = Some((row, d));
        }
    }
    let Some((row, d_deg)) = best else {
        return Ok(None);
    };
    if d_deg * 3600.0 >= match_radius_arcsec {
        return Ok(None);
    }

    let source_id = parse_source_id(table.str(row, table.column("source_id")?))?;
    let mut bands = BTreeMap::new();
    for (gaia_band, band) in BANDS {
        let key = gaia_band.to_ascii_lowercase();
        let mag = table.opt_f64(row, table.column(&format!("phot_{key}_mean_mag"))?)?;
        let flux = table.opt_f64(row, table.column(&format!("phot_{key}_mean_flux"))?)?;
        let flux_error =
            table.opt_f64(row, table.column(&format!("phot_{key}_mean_flux_error"))?)?;
        if let Some(mag) = mag {
            let mag_error = match (flux, flux_error) {
                (Some(f), Some(e)) if f > 0.0 => 2.5 / LN_10 * e / f,
                _ => 0.0,
            };
            bands.insert(band, (mag, mag_error));
        }
    }
    Ok(Some(MedianPhotometry { source_id, bands }))
}

#[derive(Debug, Clone, PartialEq)]
struct EpochRow {
    band: &'static str,
    mjd: f64,
    mag: f64,
    mag_error: f64,
}

/// Group accepted epoch-photometry rows by source id.
fn group_epochs(table: &Table) -> Result<BTreeMap<i64, Vec<EpochRow>>, AdapterError> {
    let mut grouped: BTreeMap<i64, Vec<EpochRow>> = BTreeMap::new();
    if table.is_empty() {
        return Ok(grouped);
    }
    let source_id = table.column("source_id")?;
    let band_col = table.column("band")?;
    let time = table.column("time")?;
    let mag = table.column("mag")?;
    let flux = table.column("flux")?;
    let flux_error = table.column("flux_error")?;
    let rejected = table.column("rejected_by_photometry")?;

    for row in 0..table.len() {
        if table.bool(row, rejected) {
            continue;
        }
        let Some(band) = BANDS
            .iter()
            .find(|(gaia, _)| gaia.eq_ignore_ascii_case(table.str(row, band_col)))
            .map(|(_, ours)| *ours)
        else {
            continue;
        };
        let (Some(t), Some(m)) = (table.opt_f64(row, time)?, table.opt_f64(row, mag)?) else {
            continue;
        };
        let mag_error = match (table.opt_f64(row, flux)?, table.opt_f64(row, flux_error)?) {
            (Some(f), Some(e)) if f > 0.0 => 2.5 / LN_10 * e / f,
            _ => 0.0,
        };
        grouped
            .entry(parse_source_id(table.str(row, source_id))?)
            .or_default()
            .push(EpochRow {
                band,
                mjd: t + GAIA_TIME_ZERO_JD - MJD_ZERO_JD,
                mag: m,
                mag_error,
            });
    }
    Ok(grouped)
}

fn parse_source_id(cell: &str) -> Result<i64, AdapterError> {
    cell.parse()
        .map_err(|_| AdapterError::Malformed(format!("bad source_id '{cell}'")))
}

/// AB magnitude → flux density in mJy, propagating the error.
fn mag_to_mjy(mag: f64, mag_error: f64) -> (f64, f64) {
    let flux = 10f64.powf(-0.4 * (mag - 23.9)) / 1e3;
    let error = mag_error / 2.5 * LN_10 * flux;
    (flux, error)
}
