#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod config;
mod error;
mod feed;
mod io;
mod model;
mod store;
mod ui;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::AppSettings;
use crate::store::SqliteStore;

fn main() -> eframe::Result<()> {
    let (settings, problems) = AppSettings::load();

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    for problem in &problems {
        tracing::warn!(error = %problem, "settings problem, using defaults where needed");
    }

    let db_path = settings.database_path();
    let store = match SqliteStore::open(&db_path) {
        Ok(store) => {
            tracing::info!(path = %db_path.display(), "opened task store");
            store
        }
        Err(e) => {
            tracing::error!(error = %e, path = %db_path.display(), "could not open task store, changes will not be kept");
            match SqliteStore::open_in_memory() {
                Ok(store) => store,
                Err(e) => {
                    tracing::error!(error = %e, "could not create in-memory store");
                    return Err(eframe::Error::AppCreation(Box::new(e)));
                }
            }
        }
    };

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1440.0, 800.0])
            .with_min_inner_size([900.0, 400.0])
            .with_title("Spchart"),
        ..Default::default()
    };

    eframe::run_native(
        "Spchart",
        options,
        Box::new(|cc| Ok(Box::new(app::SpchartApp::new(cc, settings, Arc::new(store))))),
    )
}
