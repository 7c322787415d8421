use anyhow::Result;
use ndarray::Axis;

use crate::raster::{PixelArray, to_display_u8};

/// Interleaved 8-bit RGB of the normalized image; one- and two-band images
/// are shown as gray from their first band.
pub fn display_rgb(image: &PixelArray) -> Vec<u8> {
    let bytes = to_display_u8(image);
    let mut rgb = Vec::with_capacity(image.height() * image.width() * 3);
    for pixel in bytes.lanes(Axis(2)) {
        if pixel.len() >= 3 {
            rgb.extend([pixel[0], pixel[1], pixel[2]]);
        } else {
            rgb.extend([pixel[0]; 3]);
        }
    }
    rgb
}

/// Opens a window showing the normalized image and blocks until it is closed.
#[cfg(feature = "viewer")]
pub fn show_image(image: &PixelArray, title: &str) -> Result<()> {
    viewer::run(image, title)
}

#[cfg(not(feature = "viewer"))]
pub fn show_image(_image: &PixelArray, _title: &str) -> Result<()> {
    anyhow::bail!("image display is not available: rebuild with `--features viewer`")
}

#[cfg(feature = "viewer")]
mod viewer {
    use anyhow::{Result, anyhow};
    use eframe::egui;

    use super::display_rgb;
    use crate::raster::PixelArray;

    struct Viewer {
        title: String,
        size: [usize; 2],
        rgb: Vec<u8>,
        texture: Option<egui::TextureHandle>,
    }

    impl eframe::App for Viewer {
        fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
            let texture = self.texture.get_or_insert_with(|| {
                ctx.load_texture(
                    "image",
                    egui::ColorImage::from_rgb(self.size, &self.rgb),
                    egui::TextureOptions::NEAREST,
                )
            });
            egui::CentralPanel::default().show(ctx, |ui| {
                ui.vertical_centered(|ui| {
                    ui.heading(&self.title);
                    ui.add(egui::Image::new(&*texture).shrink_to_fit());
                });
            });
        }
    }

    pub(super) fn run(image: &PixelArray, title: &str) -> Result<()> {
        let viewer = Viewer {
            title: title.to_string(),
            size: [image.width(), image.height()],
            rgb: display_rgb(image),
            texture: None,
        };
        let options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_title(title)
                .with_inner_size([image.width().min(1200) as f32, image.height().min(900) as f32 + 40.0]),
            ..Default::default()
        };
        eframe::run_native(title, options, Box::new(|_cc| Ok(Box::new(viewer))))
            .map_err(|e| anyhow!("image viewer failed: {e}"))
    }
}
