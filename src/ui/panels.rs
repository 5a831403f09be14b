use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use rusty_lightcurves::data::filter::{BAND_COLUMN, column_values};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Left side panel – targets and filter widgets
// ---------------------------------------------------------------------------

/// Render the left panel: target list, then label / band filters.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    let Some(store) = &state.store else {
        ui.heading("Targets");
        ui.separator();
        ui.label("No store loaded.");
        return;
    };

    // Clone what we need so we can mutate state inside the loops.
    let unique = column_values(store);
    let entries: Vec<_> = state
        .visible_objects
        .iter()
        .map(|&id| {
            let label = store.label_for(id).unwrap_or_default();
            let text = if label.is_empty() {
                id.to_string()
            } else {
                format!("{id}  {label}")
            };
            (id, text)
        })
        .collect();

    ui.heading(format!("Targets ({})", entries.len()));
    ui.separator();

    ScrollArea::vertical()
        .id_salt("targets")
        .max_height(ui.available_height() * 0.5)
        .auto_shrink([false, true])
        .show(ui, |ui: &mut Ui| {
            for (id, text) in entries {
                if ui
                    .selectable_label(state.selected == Some(id), text)
                    .clicked()
                {
                    state.selected = Some(id);
                }
            }
        });

    ui.add_space(4.0);
    ui.heading("Filters");
    ui.separator();

    ScrollArea::vertical()
        .id_salt("filters")
        .auto_shrink([false, false])
        .show(ui, |ui: &mut Ui| {
            for (col, all_values) in &unique {
                let selected = state.filters.entry(col.clone()).or_default();
                let header_text = format!("{col}  ({}/{})", selected.len(), all_values.len());

                egui::CollapsingHeader::new(RichText::new(header_text).strong())
                    .id_salt(col)
                    .default_open(col == BAND_COLUMN)
                    .show(ui, |ui: &mut Ui| {
                        ui.horizontal(|ui: &mut Ui| {
                            if ui.small_button("All").clicked() {
                                state.select_all(col);
                            }
                            if ui.small_button("None").clicked() {
                                state.select_none(col);
                            }
                        });

                        // Re-borrow after potential mutation from All/None
                        let selected = state.filters.entry(col.clone()).or_default();

                        for val in all_values {
                            let shown = if val.is_empty() { "(none)" } else { val.as_str() };
                            let mut text = RichText::new(shown);
                            if col == BAND_COLUMN {
                                if let Some(cm) = &state.color_map {
                                    text = text.color(cm.color_for(val));
                                }
                            }

                            let mut checked = selected.contains(val);
                            if ui.checkbox(&mut checked, text).changed() {
                                if checked {
                                    selected.insert(val.clone());
                                } else {
                                    selected.remove(val);
                                }
                            }
                        }
                    });
            }
        });

    state.refilter();
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open…").clicked() {
                open_file_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(store) = &state.store {
            ui.label(format!(
                "{} points, {} objects, {} visible",
                store.len(),
                store.object_count(),
                state.visible_objects.len()
            ));
        }

        ui.separator();

        ui.checkbox(&mut state.invert_magnitudes, "Invert magnitudes");
        ui.checkbox(&mut state.show_error_bars, "Error bars");

        if let Some(msg) = &state.status_message {
            ui.label(RichText::new(msg).color(Color32::RED));
        }
    });
}

// ---------------------------------------------------------------------------
// File dialog
// ---------------------------------------------------------------------------

pub fn open_file_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open light curves")
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        state.open_path(&path);
    }
}
