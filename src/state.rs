use std::collections::BTreeSet;
use std::path::Path;

use rusty_lightcurves::data::filter::{
    BAND_COLUMN, FilterState, column_values, init_filter_state, visible_objects,
};
use rusty_lightcurves::data::loader;
use rusty_lightcurves::data::model::ObjectId;
use rusty_lightcurves::data::store::AggregationStore;

use crate::color::ColorMap;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
#[derive(Default)]
pub struct AppState {
    /// Loaded store (None until user opens a file).
    pub store: Option<AggregationStore>,

    /// Per-column filter selections.
    pub filters: FilterState,

    /// Objects passing the current filters (cached).
    pub visible_objects: Vec<ObjectId>,

    /// Target whose light curve is shown.
    pub selected: Option<ObjectId>,

    /// Band colours.
    pub color_map: Option<ColorMap>,

    /// Plot magnitudes with brighter values up.
    pub invert_magnitudes: bool,

    pub show_error_bars: bool,

    /// Status / error message shown in the UI.
    pub status_message: Option<String>,
}

impl AppState {
    /// Load a store from disk, reporting failures in the status line.
    pub fn open_path(&mut self, path: &Path) {
        match loader::load_file(path) {
            Ok(store) => {
                log::info!(
                    "Loaded {} points for {} objects from {}",
                    store.len(),
                    store.object_count(),
                    path.display()
                );
                self.set_store(store);
            }
            Err(e) => {
                log::error!("Failed to load file: {e:#}");
                self.status_message = Some(format!("Error: {e:#}"));
            }
        }
    }

    /// Ingest a newly loaded store, initialise filters and colour.
    pub fn set_store(&mut self, mut store: AggregationStore) {
        store.sort_by_time();
        self.filters = init_filter_state(&store);
        let bands = column_values(&store)
            .remove(BAND_COLUMN)
            .unwrap_or_default();
        self.color_map = Some(ColorMap::new(&bands));
        self.visible_objects = store.object_ids().collect();
        self.selected = self.visible_objects.first().copied();
        self.store = Some(store);
        self.status_message = None;
    }

    /// Recompute `visible_objects` after a filter change.
    pub fn refilter(&mut self) {
        if let Some(store) = &self.store {
            self.visible_objects = visible_objects(store, &self.filters);
            if self
                .selected
                .is_some_and(|id| !self.visible_objects.contains(&id))
            {
                self.selected = self.visible_objects.first().copied();
            }
        }
    }

    /// Select all values in a column.
    pub fn select_all(&mut self, column: &str) {
        if let Some(store) = &self.store {
            if let Some(all_vals) = column_values(store).remove(column) {
                self.filters.insert(column.to_string(), all_vals);
                self.refilter();
            }
        }
    }

    /// Deselect all values in a column.
    pub fn select_none(&mut self, column: &str) {
        self.filters.insert(column.to_string(), BTreeSet::new());
        self.refilter();
    }
}
