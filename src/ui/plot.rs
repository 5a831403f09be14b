use eframe::egui::Ui;
use egui_plot::{Legend, Line, Plot, PlotPoints, Points};
use rusty_lightcurves::data::filter::visible_bands;
use rusty_lightcurves::data::model::ValueKind;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Light-curve plot (central panel)
// ---------------------------------------------------------------------------

/// Render every visible band of the selected target on one set of axes.
pub fn light_curve_plot(ui: &mut Ui, state: &AppState) {
    let (Some(store), Some(id)) = (&state.store, state.selected) else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a file to view light curves  (File → Open…)");
        });
        return;
    };

    let bands = visible_bands(store, id, &state.filters);
    // Only when every shown band is a magnitude: the values are negated so
    // brighter epochs plot higher and the axis formatter undoes the sign.
    let flip = state.invert_magnitudes
        && bands.iter().all(|band| {
            store
                .curve(id, band)
                .is_some_and(|c| c.iter().all(|p| p.value_kind == ValueKind::Magnitude))
        });
    let sign = |kind: ValueKind| match kind {
        ValueKind::Magnitude if flip => -1.0,
        _ => 1.0,
    };

    let title = match store.label_for(id) {
        Some(label) if !label.is_empty() => format!("object {id} ({label})"),
        _ => format!("object {id}"),
    };
    ui.label(title);

    let mut plot = Plot::new("light_curve_plot")
        .legend(Legend::default())
        .x_axis_label("MJD")
        .y_axis_label("Flux / magnitude")
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true);
    if flip {
        plot = plot.y_axis_formatter(|mark, _range| format!("{:.2}", -mark.value));
    }

    plot.show(ui, |plot_ui| {
        for band in bands {
            let Some(curve) = store.curve(id, band) else {
                continue;
            };
            let color = state
                .color_map
                .as_ref()
                .map(|cm| cm.color_for(band))
                .unwrap_or(eframe::egui::Color32::LIGHT_BLUE);

            let points: PlotPoints = curve
                .iter()
                .map(|p| [p.time, sign(p.value_kind) * p.value])
                .collect();
            plot_ui.points(Points::new(points).name(band).color(color).radius(2.5));

            if state.show_error_bars {
                for p in curve.iter().filter(|p| p.value_error > 0.0) {
                    let y = sign(p.value_kind) * p.value;
                    let bar: PlotPoints = [[p.time, y - p.value_error], [p.time, y + p.value_error]]
                        .into_iter()
                        .collect();
                    plot_ui.line(Line::new(bar).color(color).width(1.0));
                }
            }
        }
    });
}
