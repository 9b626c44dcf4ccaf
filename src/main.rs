mod app;
mod color;
mod state;
mod ui;

use std::path::PathBuf;

use app::CtplotApp;
use ctplot::Config;
use eframe::egui;

fn main() -> eframe::Result {
    env_logger::init();

    let config_path = std::env::var("CTPLOT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("ctplot.json"));
    let config = Config::load_or_default(&config_path).with_env();
    log::info!("Data directory {}", config.data_path().display());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 820.0])
            .with_min_inner_size([640.0, 420.0]),
        ..Default::default()
    };

    eframe::run_native(
        "ctplot",
        options,
        Box::new(|_cc| Ok(Box::new(CtplotApp::new(config)))),
    )
}
