use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::model::{Fragment, LightCurvePoint, ObjectId, TargetSet, ValueKind};

// ---------------------------------------------------------------------------
// ExportRow – one row of the persisted table
// ---------------------------------------------------------------------------

/// Flat row of the exported store: the hand-off schema for files on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub object_id: ObjectId,
    pub label: String,
    pub band: String,
    pub time: f64,
    pub value: f64,
    pub value_error: f64,
    pub value_kind: ValueKind,
}

// ---------------------------------------------------------------------------
// AggregationStore
// ---------------------------------------------------------------------------

/// Per-object, per-band light curves merged from any number of fragments.
///
/// Content after merging a set of fragments does not depend on the order or
/// grouping of the merges; [`AggregationStore::export`] is canonical.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationStore {
    curves: BTreeMap<ObjectId, BTreeMap<String, Vec<LightCurvePoint>>>,
    labels: BTreeMap<ObjectId, String>,
}

impl AggregationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the provenance label of every target so exports carry it.
    pub fn register_targets(&mut self, targets: &TargetSet) {
        for t in targets {
            self.labels
                .entry(t.object_id)
                .or_insert_with(|| t.label.clone());
        }
    }

    /// Fold a fragment in. Points with an unseen `(object_id, band)` open a
    /// new curve; existing curves are appended to, never deduplicated.
    pub fn merge(&mut self, fragment: Fragment) {
        for point in fragment {
            self.curves
                .entry(point.object_id)
                .or_default()
                .entry(point.band.clone())
                .or_default()
                .push(point);
        }
    }

    /// Merge another store, as when combining a reloaded file with a new run.
    pub fn merge_store(&mut self, other: AggregationStore) {
        for (id, label) in other.labels {
            self.labels.entry(id).or_insert(label);
        }
        for (id, bands) in other.curves {
            let entry = self.curves.entry(id).or_default();
            for (band, mut points) in bands {
                entry.entry(band).or_default().append(&mut points);
            }
        }
    }

    /// Sort every curve by time in place.
    pub fn sort_by_time(&mut self) {
        for bands in self.curves.values_mut() {
            for points in bands.values_mut() {
                points.sort_by(cmp_points);
            }
        }
    }

    /// Total number of points.
    pub fn len(&self) -> usize {
        self.curves
            .values()
            .flat_map(|bands| bands.values())
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of objects with at least one point.
    pub fn object_count(&self) -> usize {
        self.curves.len()
    }

    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.curves.keys().copied()
    }

    pub fn label_for(&self, id: ObjectId) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn bands_for(&self, id: ObjectId) -> impl Iterator<Item = &str> {
        self.curves
            .get(&id)
            .into_iter()
            .flat_map(|bands| bands.keys().map(String::as_str))
    }

    pub fn curve(&self, id: ObjectId, band: &str) -> Option<&[LightCurvePoint]> {
        self.curves
            .get(&id)
            .and_then(|bands| bands.get(band))
            .map(Vec::as_slice)
    }

    /// Every band name present in the store.
    pub fn all_bands(&self) -> Vec<String> {
        let mut bands: Vec<String> = self
            .curves
            .values()
            .flat_map(|b| b.keys().cloned())
            .collect();
        bands.sort();
        bands.dedup();
        bands
    }

    /// Flatten into rows ordered by object, band, then time.
    pub fn export(&self) -> Vec<ExportRow> {
        let mut rows = Vec::with_capacity(self.len());
        for (id, bands) in &self.curves {
            let label = self.labels.get(id).cloned().unwrap_or_default();
            for (band, points) in bands {
                let mut sorted: Vec<&LightCurvePoint> = points.iter().collect();
                sorted.sort_by(|a, b| cmp_points(a, b));
                rows.extend(sorted.into_iter().map(|p| ExportRow {
                    object_id: *id,
                    label: label.clone(),
                    band: band.clone(),
                    time: p.time,
                    value: p.value,
                    value_error: p.value_error,
                    value_kind: p.value_kind,
                }));
            }
        }
        rows
    }

    /// Rebuild a store from exported rows.
    pub fn from_rows<I: IntoIterator<Item = ExportRow>>(rows: I) -> Self {
        let mut store = Self::new();
        for row in rows {
            store.labels.entry(row.object_id).or_insert(row.label);
            store
                .curves
                .entry(row.object_id)
                .or_default()
                .entry(row.band.clone())
                .or_default()
                .push(LightCurvePoint {
                    object_id: row.object_id,
                    band: row.band,
                    time: row.time,
                    value: row.value,
                    value_error: row.value_error,
                    value_kind: row.value_kind,
                });
        }
        store
    }
}

fn cmp_points(a: &LightCurvePoint, b: &LightCurvePoint) -> Ordering {
    a.time
        .total_cmp(&b.time)
        .then_with(|| a.value.total_cmp(&b.value))
        .then_with(|| a.value_error.total_cmp(&b.value_error))
        .then_with(|| a.value_kind.cmp(&b.value_kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: u64, band: &str, time: f64, value: f64) -> LightCurvePoint {
        LightCurvePoint {
            object_id: ObjectId(id),
            band: band.to_string(),
            time,
            value,
            value_error: 0.0,
            value_kind: ValueKind::Flux,
        }
    }

    fn fragments() -> Vec<Fragment> {
        vec![
            Fragment::from_iter([point(0, "wise_w1", 3.0, 1.0), point(0, "wise_w1", 1.0, 2.0)]),
            Fragment::from_iter([point(1, "ztf_g", 2.0, 18.1)]),
            Fragment::from_iter([point(0, "ztf_g", 5.0, 17.0), point(1, "ztf_g", 1.5, 18.3)]),
            Fragment::new(),
        ]
    }

    /// Every ordering of `0..n`.
    fn permutations(n: usize) -> Vec<Vec<usize>> {
        if n == 0 {
            return vec![Vec::new()];
        }
        let mut out = Vec::new();
        for rest in permutations(n - 1) {
            for pos in 0..=rest.len() {
                let mut p = rest.clone();
                p.insert(pos, n - 1);
                out.push(p);
            }
        }
        out
    }

    #[test]
    fn merge_order_does_not_change_export() {
        let frags = fragments();
        let mut reference = AggregationStore::new();
        for f in frags.iter().cloned() {
            reference.merge(f);
        }
        assert_eq!(reference.len(), 5);

        let orders = permutations(frags.len());
        assert_eq!(orders.len(), 24);
        for order in orders {
            let mut store = AggregationStore::new();
            for &i in &order {
                store.merge(frags[i].clone());
            }
            assert_eq!(store.export(), reference.export(), "order {order:?}");
        }
    }

    #[test]
    fn merge_grouping_does_not_change_export() {
        let frags = fragments();
        let mut reference = AggregationStore::new();
        for f in frags.iter().cloned() {
            reference.merge(f);
        }

        // (F0 ∪ F1) ∪ (F3 ∪ F2)
        let mut left = AggregationStore::new();
        left.merge(frags[0].clone());
        left.merge(frags[1].clone());
        let mut right = AggregationStore::new();
        right.merge(frags[3].clone());
        right.merge(frags[2].clone());
        left.merge_store(right);

        assert_eq!(left.export(), reference.export());
    }

    #[test]
    fn empty_fragment_leaves_store_unchanged() {
        let mut store = AggregationStore::new();
        store.merge(fragments().remove(0));
        let before = store.clone();
        store.merge(Fragment::new());
        assert_eq!(store, before);
    }

    #[test]
    fn colliding_band_keys_are_concatenated() {
        let mut store = AggregationStore::new();
        store.merge(Fragment::from_iter([point(0, "ztf_g", 1.0, 17.0)]));
        store.merge(Fragment::from_iter([point(0, "ztf_g", 1.0, 17.0)]));
        assert_eq!(store.curve(ObjectId(0), "ztf_g").map(<[_]>::len), Some(2));
    }

    #[test]
    fn export_carries_labels_and_sorts_by_time() {
        let targets = TargetSet::from_coordinates([
            (crate::data::model::SkyCoord::new(1.0, 1.0), "changing-look"),
            (crate::data::model::SkyCoord::new(2.0, 2.0), "tde"),
        ]);
        let mut store = AggregationStore::new();
        store.register_targets(&targets);
        store.merge(fragments().remove(0));

        let rows = store.export();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.label == "changing-look"));
        assert_eq!(rows[0].time, 1.0);
        assert_eq!(rows[1].time, 3.0);
    }

    #[test]
    fn sort_by_time_orders_each_curve() {
        let mut store = AggregationStore::new();
        store.merge(fragments().remove(0));
        store.sort_by_time();
        let times: Vec<f64> = store
            .curve(ObjectId(0), "wise_w1")
            .unwrap()
            .iter()
            .map(|p| p.time)
            .collect();
        assert_eq!(times, vec![1.0, 3.0]);
    }

    #[test]
    fn rows_rebuild_an_equivalent_store() {
        let mut store = AggregationStore::new();
        for f in fragments() {
            store.merge(f);
        }
        let rebuilt = AggregationStore::from_rows(store.export());
        assert_eq!(rebuilt.export(), store.export());
        assert_eq!(rebuilt.all_bands(), vec!["wise_w1".to_string(), "ztf_g".to_string()]);
    }
}
