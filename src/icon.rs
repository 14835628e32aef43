use std::path::Path;

use eframe::egui;
use image::RgbaImage;
use log::warn;

pub const ICON_FILE: &str = "icon.png";

/// Shown on every game card.
pub const CARD_ICON_SIZE: f32 = 50.0;

/// Decodes `path` into RGBA pixels. A missing or undecodable icon is not an
/// error; the window and the cards just go without one.
fn load_rgba(path: &Path) -> Option<RgbaImage> {
    match image::open(path) {
        Ok(img) => Some(img.to_rgba8()),
        Err(err) => {
            warn!("no icon from {}: {err}", path.display());
            None
        }
    }
}

pub fn window_icon(path: &Path) -> Option<egui::IconData> {
    let img = load_rgba(path)?;
    Some(egui::IconData {
        width: img.width(),
        height: img.height(),
        rgba: img.into_raw(),
    })
}

fn color_image(img: &RgbaImage) -> egui::ColorImage {
    let size = [img.width() as usize, img.height() as usize];
    egui::ColorImage::from_rgba_unmultiplied(size, img.as_raw())
}

/// Uploads the card icon once; the handle is shared by every card.
pub fn card_texture(ctx: &egui::Context, path: &Path) -> Option<egui::TextureHandle> {
    let img = load_rgba(path)?;
    Some(ctx.load_texture("card-icon", color_image(&img), egui::TextureOptions::LINEAR))
}
