use image::{GrayImage, ImageFormat, Luma};
use qrcode::{Color, QrCode};
use std::io::Cursor;

use crate::NotifyError;

/// Turns a ticket payload into image bytes.
pub trait QrRenderer: Send + Sync {
    fn render(&self, payload: &str) -> Result<Vec<u8>, NotifyError>;

    fn content_type(&self) -> &'static str {
        "image/png"
    }
}

/// Light margin around the symbol, in modules. Scanners need at least four.
const QUIET_ZONE: u32 = 4;

pub struct PngQrRenderer {
    module_px: u32,
}

impl PngQrRenderer {
    pub fn new(module_px: u32) -> Self {
        Self {
            module_px: module_px.max(1),
        }
    }
}

impl Default for PngQrRenderer {
    fn default() -> Self {
        Self::new(8)
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, payload: &str) -> Result<Vec<u8>, NotifyError> {
        let code = QrCode::new(payload.as_bytes()).map_err(|e| NotifyError::Render(e.to_string()))?;
        let width = code.width() as u32;
        let colors = code.to_colors();
        let px = self.module_px;
        let side = (width + 2 * QUIET_ZONE) * px;

        let img = GrayImage::from_fn(side, side, |x, y| {
            let (mx, my) = (x / px, y / px);
            let inside = (QUIET_ZONE..QUIET_ZONE + width).contains(&mx)
                && (QUIET_ZONE..QUIET_ZONE + width).contains(&my);
            if inside {
                let idx = ((my - QUIET_ZONE) * width + (mx - QUIET_ZONE)) as usize;
                if colors[idx] == Color::Dark {
                    return Luma([0u8]);
                }
            }
            Luma([255u8])
        });

        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .map_err(|e| NotifyError::Render(e.to_string()))?;
        Ok(buf)
    }
}
