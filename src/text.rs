//! Fonts & Text
//!
//! The font registry is a thin bookkeeping layer: rasterization and
//! measurement are external services injected as a [`TextRasterizer`], the
//! backend only tracks which fonts exist and turns rasterized text into
//! cached textures. A missing or failing rasterizer is an informational
//! failure — the renderer records `ErrorState::FontLoadFailure` and the
//! draw is skipped.

use glam::Vec4;
use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Handle to a loaded font.
    pub struct FontId;
}

/// A registered font face at a given pixel size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    pub name: String,
    pub size: u32,
}

/// Coverage bitmap produced by a rasterizer — tightly packed RGBA8.
pub struct RasterizedText {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// External text service: measure and rasterize strings for a font.
pub trait TextRasterizer {
    /// Pixel dimensions `(width, height)` the string would occupy.
    fn measure(&self, font: &FontInfo, text: &str) -> (u32, u32);

    /// Rasterize a string; `None` signals failure.
    fn rasterize(&self, font: &FontInfo, text: &str, color: Vec4) -> Option<RasterizedText>;
}

/// The renderer-owned font registry.
#[derive(Default)]
pub struct Fonts {
    fonts: SlotMap<FontId, FontInfo>,
    rasterizer: Option<Box<dyn TextRasterizer>>,
}

impl Fonts {
    /// Inject the rasterization service.
    pub fn set_rasterizer(&mut self, rasterizer: Box<dyn TextRasterizer>) {
        self.rasterizer = Some(rasterizer);
    }

    #[must_use]
    pub fn has_rasterizer(&self) -> bool {
        self.rasterizer.is_some()
    }

    /// Register a font face. Fails (returns `None`) when no rasterizer is
    /// installed to ever draw it.
    pub fn load(&mut self, name: &str, size: u32) -> Option<FontId> {
        if self.rasterizer.is_none() || name.is_empty() {
            return None;
        }
        Some(self.fonts.insert(FontInfo {
            name: name.to_string(),
            size,
        }))
    }

    #[must_use]
    pub fn get(&self, id: FontId) -> Option<&FontInfo> {
        self.fonts.get(id)
    }

    /// Measure a string with the installed rasterizer.
    #[must_use]
    pub fn measure(&self, id: FontId, text: &str) -> Option<(u32, u32)> {
        let font = self.fonts.get(id)?;
        self.rasterizer.as_ref().map(|r| r.measure(font, text))
    }

    /// Rasterize a string with the installed rasterizer.
    #[must_use]
    pub fn rasterize(&self, id: FontId, text: &str, color: Vec4) -> Option<RasterizedText> {
        let font = self.fonts.get(id)?;
        self.rasterizer.as_ref()?.rasterize(font, text, color)
    }
}
