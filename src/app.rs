use eframe::{App, egui};
use egui::{Color32, Key, RichText, TextEdit};
use log::{error, info, warn};

use crate::catalog::Catalog;
use crate::config::AppConfig;
use crate::error::CatalogError;
use crate::icon::CARD_ICON_SIZE;
use crate::launcher::{LaunchOutcome, Launcher, open_help_page};
use crate::models::{GameEntry, NewGame, ScanSummary};
use crate::scanner::{ScanController, ScanEvent, Scanner, scan_roots_exist};

const GRID_COLUMNS: usize = 2;
const CARD_ROUNDING: f32 = 10.0;
const BUTTON_ROUNDING: f32 = 5.0;
const NAME_FONT_SIZE: f32 = 18.0;
const TOOLBAR_FONT_SIZE: f32 = 16.0;

const ADD_COLOR: Color32 = Color32::from_rgb(0, 123, 255);
const SCAN_COLOR: Color32 = Color32::from_rgb(40, 167, 69);
const DANGER_COLOR: Color32 = Color32::from_rgb(220, 53, 69);
const HELP_COLOR: Color32 = Color32::from_rgb(108, 117, 125);
const GRID_BACKGROUND: Color32 = Color32::from_rgb(44, 44, 44);
const CARD_BACKGROUND: Color32 = Color32::from_rgb(64, 64, 64);

enum Notice {
    Info(String),
    Error(String),
}

pub struct GameShelfApp {
    config: AppConfig,
    catalog: Catalog,
    launcher: Launcher,
    scans: ScanController,
    query: String,
    games: Vec<GameEntry>,
    total_games: usize,
    catalog_empty: bool,
    card_icon: Option<egui::TextureHandle>,
    scan_progress: Option<u8>,
    notice: Option<Notice>,
    confirm_clear: bool,
}

impl GameShelfApp {
    pub fn new(
        config: AppConfig,
        catalog: Catalog,
        card_icon: Option<egui::TextureHandle>,
    ) -> Self {
        let mut app = Self {
            config,
            catalog,
            launcher: Launcher::new(),
            scans: ScanController::new(),
            query: String::new(),
            games: Vec::new(),
            total_games: 0,
            catalog_empty: true,
            card_icon,
            scan_progress: None,
            notice: None,
            confirm_clear: false,
        };
        app.refresh();
        app
    }

    fn refresh(&mut self) {
        let listed = self
            .catalog
            .find_by_name_substring(&self.query)
            .and_then(|games| {
                Ok((games, self.catalog.len()?, self.catalog.is_empty()?))
            });
        match listed {
            Ok((games, total, empty)) => {
                self.games = games;
                self.total_games = total;
                self.catalog_empty = empty;
            }
            Err(err) => self.report_error(format!("Failed to load games: {err}")),
        }
    }

    fn report_error(&mut self, message: String) {
        error!("{message}");
        self.notice = Some(Notice::Error(message));
    }

    fn report_info(&mut self, message: String) {
        info!("{message}");
        self.notice = Some(Notice::Info(message));
    }

    fn add_game_from_dialog(&mut self) {
        let extension = self.config.executable_suffix.trim_start_matches('.');
        let mut dialog = rfd::FileDialog::new().set_title("Select Game Executable");
        if !extension.is_empty() {
            dialog = dialog.add_filter("Executables", &[extension]);
        }
        let Some(path) = dialog.add_filter("All files", &["*"]).pick_file() else {
            return;
        };
        let Some(game) = NewGame::from_executable(&path) else {
            self.report_error(format!("Not a file: {}", path.display()));
            return;
        };

        match self.catalog.add(&game.name, &game.path) {
            Ok(entry) => self.report_info(format!("Added {}", entry.name)),
            Err(CatalogError::Duplicate { name }) => {
                self.notice = Some(Notice::Error(format!(
                    "The game {name} is already added."
                )));
            }
            Err(err) => self.report_error(format!("Failed to add game: {err}")),
        }
        self.refresh();
    }

    fn start_scan(&mut self, ctx: &egui::Context) {
        let scanner = Scanner::from_config(&self.config);
        if !scan_roots_exist(scanner.roots()) {
            warn!("none of the configured scan folders exist");
        }

        let ctx = ctx.clone();
        match self.scans.start(scanner, move || ctx.request_repaint()) {
            Ok(()) => {
                self.scan_progress = Some(0);
                self.notice = None;
            }
            Err(err) => self.report_error(format!("Cannot scan: {err}")),
        }
    }

    fn apply_scan_events(&mut self) {
        for event in self.scans.poll() {
            match event {
                ScanEvent::Progress(percent) => self.scan_progress = Some(percent),
                ScanEvent::Finished(summary) => {
                    self.scan_progress = None;
                    self.ingest_scan(summary);
                }
                ScanEvent::Cancelled => {
                    self.scan_progress = None;
                    self.report_info("Scan cancelled".to_string());
                }
            }
        }

        // The scan thread died without a terminal event.
        if self.scan_progress.is_some() && !self.scans.is_running() {
            self.scan_progress = None;
            self.report_error("Scan stopped unexpectedly".to_string());
        }
    }

    fn ingest_scan(&mut self, summary: ScanSummary) {
        match self.catalog.ingest(&summary.found) {
            Ok(report) => {
                let mut message = format!(
                    "Scan found {} executables: {} added, {} already cataloged",
                    summary.found.len(),
                    report.added,
                    report.skipped
                );
                if summary.unreadable > 0 {
                    message.push_str(&format!(" ({} entries unreadable)", summary.unreadable));
                }
                self.report_info(message);
            }
            Err(err) => self.report_error(format!("Failed to save scan results: {err}")),
        }
        self.refresh();
    }

    fn launch_game(&mut self, game: &GameEntry) {
        match self.launcher.launch(&game.path) {
            Ok(LaunchOutcome::Started { .. }) => {
                self.report_info(format!("Launched {}", game.name));
            }
            Ok(LaunchOutcome::ElevationRequested) => {
                self.report_info(format!("Requested administrator launch of {}", game.name));
            }
            Err(err) => self.report_error(format!("Failed to launch game: {err}")),
        }
    }

    fn clear_games(&mut self) {
        match self.catalog.clear() {
            Ok(removed) => self.report_info(format!("Removed {removed} games")),
            Err(err) => self.report_error(format!("Failed to clear games: {err}")),
        }
        self.refresh();
    }

    fn open_help(&mut self) {
        if let Err(err) = open_help_page(&self.config.help_url) {
            self.report_error(format!("{err:#}"));
        }
    }

    fn render_toolbar(&mut self, ui: &mut egui::Ui) {
        let search = ui.add(
            TextEdit::singleline(&mut self.query)
                .hint_text("Search games...")
                .font(egui::TextStyle::Heading)
                .desired_width(f32::INFINITY),
        );
        if search.changed() {
            self.refresh();
        }

        ui.add_space(8.0);
        let scanning = self.scans.is_running();
        ui.horizontal(|ui| {
            if ui.add(toolbar_button("Add Game", ADD_COLOR)).clicked() {
                self.add_game_from_dialog();
            }
            if scanning {
                if ui.add(toolbar_button("Cancel Scan", HELP_COLOR)).clicked() {
                    self.scans.cancel();
                }
            } else if ui.add(toolbar_button("Scan for Games", SCAN_COLOR)).clicked() {
                self.start_scan(ui.ctx());
            }
            if ui
                .add_enabled(!scanning, toolbar_button("Clear Games", DANGER_COLOR))
                .clicked()
            {
                self.confirm_clear = true;
            }
            if ui.add(toolbar_button("Help", HELP_COLOR)).clicked() {
                self.open_help();
            }
        });

        if let Some(percent) = self.scan_progress {
            ui.add_space(6.0);
            ui.add(egui::ProgressBar::new(f32::from(percent) / 100.0).show_percentage());
        }

        match &self.notice {
            Some(Notice::Error(message)) => {
                ui.add_space(6.0);
                ui.colored_label(Color32::RED, format!("Error: {message}"));
            }
            Some(Notice::Info(message)) => {
                ui.add_space(6.0);
                ui.label(RichText::new(message).color(Color32::from_gray(110)));
            }
            None => {}
        }
    }

    /// Draws the catalog and returns the game whose Launch button was clicked.
    fn render_grid(&self, ui: &mut egui::Ui) -> Option<GameEntry> {
        let mut clicked = None;
        egui::Frame::none()
            .fill(GRID_BACKGROUND)
            .inner_margin(egui::Margin::same(10.0))
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false; 2])
                    .show(ui, |ui| {
                        if self.games.is_empty() {
                            let hint = if self.catalog_empty {
                                "No games yet. Add one or scan for games."
                            } else {
                                "No games match your search."
                            };
                            ui.label(RichText::new(hint).italics().color(Color32::from_gray(180)));
                            return;
                        }

                        for row in self.games.chunks(GRID_COLUMNS) {
                            ui.columns(GRID_COLUMNS, |columns| {
                                for (column, game) in columns.iter_mut().zip(row) {
                                    let launch = column
                                        .push_id(game.id, |ui| {
                                            render_card(ui, game, self.card_icon.as_ref())
                                        })
                                        .inner;
                                    if launch {
                                        clicked = Some(game.clone());
                                    }
                                }
                            });
                            ui.add_space(10.0);
                        }
                    });
            });
        clicked
    }

    fn render_clear_confirmation(&mut self, ctx: &egui::Context) {
        if !self.confirm_clear {
            return;
        }

        let mut answer = None;
        egui::Window::new("Confirmation")
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label("Are you sure you want to clear all games?");
                ui.add_space(8.0);
                ui.horizontal(|ui| {
                    if ui.add(toolbar_button("Yes", DANGER_COLOR)).clicked() {
                        answer = Some(true);
                    }
                    if ui.add(toolbar_button("No", HELP_COLOR)).clicked() {
                        answer = Some(false);
                    }
                });
            });

        if ctx.input(|input| input.key_pressed(Key::Escape)) {
            answer = Some(false);
        }

        if let Some(confirmed) = answer {
            self.confirm_clear = false;
            if confirmed {
                self.clear_games();
            }
        }
    }
}

fn toolbar_button(label: &str, fill: Color32) -> egui::Button<'static> {
    egui::Button::new(
        RichText::new(label.to_string())
            .size(TOOLBAR_FONT_SIZE)
            .color(Color32::WHITE),
    )
    .fill(fill)
    .rounding(egui::Rounding::same(BUTTON_ROUNDING))
    .min_size(egui::vec2(120.0, 36.0))
}

/// Returns true when the card's Launch button was clicked.
fn render_card(
    ui: &mut egui::Ui,
    game: &GameEntry,
    icon: Option<&egui::TextureHandle>,
) -> bool {
    egui::Frame::none()
        .fill(CARD_BACKGROUND)
        .rounding(egui::Rounding::same(CARD_ROUNDING))
        .inner_margin(egui::Margin::same(10.0))
        .show(ui, |ui| {
            ui.set_width(ui.available_width());
            ui.horizontal(|ui| {
                if let Some(texture) = icon {
                    let size = egui::vec2(CARD_ICON_SIZE, CARD_ICON_SIZE);
                    ui.add(
                        egui::Image::new(egui::load::SizedTexture::new(texture.id(), size))
                            .fit_to_exact_size(size),
                    );
                }
                ui.vertical(|ui| {
                    ui.label(
                        RichText::new(&game.name)
                            .size(NAME_FONT_SIZE)
                            .color(Color32::WHITE),
                    );
                    ui.label(
                        RichText::new(&game.path)
                            .size(12.0)
                            .color(Color32::from_gray(170)),
                    );
                });
            });
            ui.add_space(4.0);
            ui.add(toolbar_button("Launch", DANGER_COLOR)).clicked()
        })
        .inner
}

impl App for GameShelfApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.apply_scan_events();

        egui::TopBottomPanel::top("toolbar")
            .frame(egui::Frame::none().inner_margin(egui::Margin::same(14.0)))
            .show(ctx, |ui| self.render_toolbar(ui));

        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            let label = match self.total_games {
                1 => "1 game".to_string(),
                n => format!("{n} games"),
            };
            ui.label(RichText::new(label).color(Color32::from_gray(120)));
        });

        let launch = egui::CentralPanel::default()
            .show(ctx, |ui| self.render_grid(ui))
            .inner;

        self.render_clear_confirmation(ctx);

        if let Some(game) = launch {
            self.launch_game(&game);
        }
    }
}
