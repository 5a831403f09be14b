use std::collections::{BTreeMap, BTreeSet};

use super::model::ObjectId;
use super::store::AggregationStore;

// ---------------------------------------------------------------------------
// Filter predicate: which values are selected per column
// ---------------------------------------------------------------------------

pub const LABEL_COLUMN: &str = "label";
pub const BAND_COLUMN: &str = "band";

/// Per-column selection state: maps column_name → set of selected values.
/// If a column is absent it means "no filter" (show all).
pub type FilterState = BTreeMap<String, BTreeSet<String>>;

/// The unique values of every filterable column.
pub fn column_values(store: &AggregationStore) -> BTreeMap<String, BTreeSet<String>> {
    let labels: BTreeSet<String> = store
        .object_ids()
        .map(|id| store.label_for(id).unwrap_or_default().to_string())
        .collect();
    let bands: BTreeSet<String> = store.all_bands().into_iter().collect();

    BTreeMap::from([
        (LABEL_COLUMN.to_string(), labels),
        (BAND_COLUMN.to_string(), bands),
    ])
}

/// Initialise a [`FilterState`] with all values selected (i.e., show everything).
pub fn init_filter_state(store: &AggregationStore) -> FilterState {
    column_values(store)
}

fn is_selected(filters: &FilterState, column: &str, value: &str) -> bool {
    filters
        .get(column)
        .map_or(true, |selected| selected.contains(value))
}

/// Objects whose label is selected and that have at least one selected band.
pub fn visible_objects(store: &AggregationStore, filters: &FilterState) -> Vec<ObjectId> {
    store
        .object_ids()
        .filter(|&id| is_selected(filters, LABEL_COLUMN, store.label_for(id).unwrap_or_default()))
        .filter(|&id| {
            store
                .bands_for(id)
                .any(|band| is_selected(filters, BAND_COLUMN, band))
        })
        .collect()
}

/// Bands of one object that pass the band filter.
pub fn visible_bands<'a>(
    store: &'a AggregationStore,
    id: ObjectId,
    filters: &FilterState,
) -> Vec<&'a str> {
    store
        .bands_for(id)
        .filter(|band| is_selected(filters, BAND_COLUMN, band))
        .collect()
}
