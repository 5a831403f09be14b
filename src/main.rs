mod app;
mod color;
mod state;
mod ui;

use std::path::PathBuf;

use app::LightCurveApp;
use clap::Parser;
use eframe::egui;

/// Interactive viewer for exported light-curve stores.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Store to open on start (.parquet, .csv or .json).
    file: Option<PathBuf>,
}

fn main() -> eframe::Result {
    env_logger::init();
    let args = Args::parse();

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1200.0, 800.0])
            .with_min_inner_size([600.0, 400.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Rusty Lightcurves – Light Curve Viewer",
        options,
        Box::new(move |_cc| {
            let mut app = LightCurveApp::default();
            if let Some(path) = args.file {
                app.state.open_path(&path);
            }
            Ok(Box::new(app))
        }),
    )
}
