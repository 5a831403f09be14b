use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::SetupError;

// ---------------------------------------------------------------------------
// Identifiers and sky positions
// ---------------------------------------------------------------------------

/// Opaque, run-unique key of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ICRS position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    pub ra_deg: f64,
    pub dec_deg: f64,
}

impl SkyCoord {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self { ra_deg, dec_deg }
    }
}

/// An angular distance. Stored in degrees; archives disagree on the unit they
/// want, so adapters convert at the query boundary.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Angle {
    degrees: f64,
}

impl Angle {
    pub fn from_degrees(degrees: f64) -> Self {
        Self { degrees }
    }

    pub fn from_arcsec(arcsec: f64) -> Self {
        Self {
            degrees: arcsec / 3600.0,
        }
    }

    pub fn degrees(self) -> f64 {
        self.degrees
    }

    pub fn arcsec(self) -> f64 {
        self.degrees * 3600.0
    }
}

// ---------------------------------------------------------------------------
// Target / TargetSet
// ---------------------------------------------------------------------------

/// One object to search for. The label is carried with the target so any
/// slice of a [`TargetSet`] keeps coordinates and labels paired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub object_id: ObjectId,
    pub coord: SkyCoord,
    pub label: String,
}

/// The immutable list of targets every adapter query is scoped to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSet {
    targets: Vec<Target>,
}

impl TargetSet {
    /// Wrap an existing list, rejecting duplicate object ids.
    pub fn new(targets: Vec<Target>) -> Result<Self, SetupError> {
        let mut seen = BTreeSet::new();
        for t in &targets {
            if !seen.insert(t.object_id) {
                return Err(SetupError::DuplicateTarget(t.object_id));
            }
        }
        Ok(Self { targets })
    }

    /// Build a set from `(coord, label)` pairs, generating ids `0..n`.
    pub fn from_coordinates<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (SkyCoord, S)>,
        S: Into<String>,
    {
        let targets = entries
            .into_iter()
            .enumerate()
            .map(|(i, (coord, label))| Target {
                object_id: ObjectId(i as u64),
                coord,
                label: label.into(),
            })
            .collect();
        Self { targets }
    }

    pub fn as_slice(&self) -> &[Target] {
        &self.targets
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Target> {
        self.targets.iter()
    }

    pub fn get(&self, id: ObjectId) -> Option<&Target> {
        self.targets.iter().find(|t| t.object_id == id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl<'a> IntoIterator for &'a TargetSet {
    type Item = &'a Target;
    type IntoIter = std::slice::Iter<'a, Target>;

    fn into_iter(self) -> Self::IntoIter {
        self.targets.iter()
    }
}

// ---------------------------------------------------------------------------
// LightCurvePoint
// ---------------------------------------------------------------------------

/// Whether a point's value is a flux density or a magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    #[serde(rename = "flux")]
    Flux,
    #[serde(rename = "mag")]
    Magnitude,
}

impl ValueKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Flux => "flux",
            ValueKind::Magnitude => "mag",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flux" => Ok(ValueKind::Flux),
            "mag" | "magnitude" => Ok(ValueKind::Magnitude),
            other => Err(format!("unknown value kind '{other}'")),
        }
    }
}

/// A single measurement. Time is MJD for every adapter in this crate; the
/// value unit depends on the band (see the adapter that stamps it).
#[derive(Debug, Clone, PartialEq)]
pub struct LightCurvePoint {
    pub object_id: ObjectId,
    /// Instrument + filter, namespaced by the producing adapter (`ztf_g`).
    pub band: String,
    pub time: f64,
    pub value: f64,
    /// 0.0 when the archive does not provide an uncertainty.
    pub value_error: f64,
    pub value_kind: ValueKind,
}

// ---------------------------------------------------------------------------
// Fragment
// ---------------------------------------------------------------------------

/// The points produced by one adapter invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    points: Vec<LightCurvePoint>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: LightCurvePoint) {
        self.points.push(point);
    }

    /// Append one point for `target` in `band`.
    pub fn record(
        &mut self,
        target: &Target,
        band: &str,
        time: f64,
        value: f64,
        value_error: f64,
        value_kind: ValueKind,
    ) {
        self.points.push(LightCurvePoint {
            object_id: target.object_id,
            band: band.to_string(),
            time,
            value,
            value_error,
            value_kind,
        });
    }

    pub fn points(&self) -> &[LightCurvePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Distinct bands present in the fragment.
    pub fn bands(&self) -> BTreeSet<&str> {
        self.points.iter().map(|p| p.band.as_str()).collect()
    }
}

impl IntoIterator for Fragment {
    type Item = LightCurvePoint;
    type IntoIter = std::vec::IntoIter<LightCurvePoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.into_iter()
    }
}

impl FromIterator<LightCurvePoint> for Fragment {
    fn from_iter<T: IntoIterator<Item = LightCurvePoint>>(iter: T) -> Self {
        Self {
            points: iter.into_iter().collect(),
        }
    }
}
