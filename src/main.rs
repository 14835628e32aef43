#![cfg_attr(not(debug_assertions), windows_subsystem = "windows")]

mod app;
mod catalog;
mod config;
mod error;
mod icon;
mod launcher;
mod models;
mod scanner;

use std::path::Path;

use anyhow::Context;
use log::{error, info};

use app::GameShelfApp;
use catalog::Catalog;
use config::AppConfig;

const APP_TITLE: &str = "Game Launcher";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::load();
    let catalog = match open_catalog(&config) {
        Ok(catalog) => catalog,
        Err(err) => {
            error!("cannot start without a catalog: {err:#}");
            return Err(err);
        }
    };

    let mut viewport = eframe::egui::ViewportBuilder::default()
        .with_inner_size([1200.0, 800.0])
        .with_min_inner_size([640.0, 420.0])
        .with_resizable(true)
        .with_title(APP_TITLE);
    if let Some(window_icon) = icon::window_icon(Path::new(icon::ICON_FILE)) {
        viewport = viewport.with_icon(window_icon);
    }

    let native_options = eframe::NativeOptions {
        viewport,
        ..Default::default()
    };

    info!("starting {APP_TITLE}");
    eframe::run_native(
        APP_TITLE,
        native_options,
        Box::new(move |cc| {
            let card_icon = icon::card_texture(&cc.egui_ctx, Path::new(icon::ICON_FILE));
            Box::new(GameShelfApp::new(config, catalog, card_icon))
        }),
    )
    .map_err(|err| anyhow::anyhow!("window system error: {err}"))
}

fn open_catalog(config: &AppConfig) -> anyhow::Result<Catalog> {
    let path = config.database_path()?;
    Catalog::open(&path).with_context(|| format!("failed to open catalog at {}", path.display()))
}
