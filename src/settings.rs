//! Renderer Settings & Pipeline Options
//!
//! Host-supplied configuration for the backend. [`RendererSettings`] is
//! consumed once at [`crate::renderer::Renderer`] construction;
//! [`PipelineOptions`] travels with the active render pass and is applied
//! whenever shader-stage pipelines are (re)built — blend equation and fill
//! mode are baked into pipelines on modern GPU APIs, so changing them
//! rebuilds the affected pipelines rather than flipping device state.

/// Top-level renderer configuration.
///
/// # Example
///
/// ```rust,ignore
/// let settings = RendererSettings {
///     vsync: false,
///     ..Default::default()
/// };
/// let renderer = Renderer::new(settings)?;
/// ```
#[derive(Debug, Clone)]
pub struct RendererSettings {
    /// Initial window (and framebuffer-target) width in pixels.
    pub width: u32,
    /// Initial window (and framebuffer-target) height in pixels.
    pub height: u32,
    /// Present with vertical sync.
    pub vsync: bool,
    /// Clear color applied to every window each frame (RGBA, 0–1).
    pub clear_color: [f64; 4],
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Blend equation selection for color output.
///
/// Numeric values match the public-API blend-mode ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum BlendMode {
    /// Blending disabled.
    Off = 0,
    /// `src * src_alpha + dst * (1 - src_alpha)` — the default.
    #[default]
    Add = 1,
    /// Subtract destination from source.
    Subtract = 2,
    /// Subtract source from destination.
    ReverseSubtract = 3,
    /// Component-wise minimum.
    Min = 4,
    /// Component-wise maximum.
    Max = 5,
}

impl BlendMode {
    /// Map a public-API blend id to a mode. Unknown ids fall back to `Add`.
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Self::Off,
            2 => Self::Subtract,
            3 => Self::ReverseSubtract,
            4 => Self::Min,
            5 => Self::Max,
            _ => Self::Add,
        }
    }

    /// The wgpu blend state for this mode, or `None` when blending is off.
    #[must_use]
    pub fn blend_state(self) -> Option<wgpu::BlendState> {
        let op = match self {
            Self::Off => return None,
            Self::Add => wgpu::BlendOperation::Add,
            Self::Subtract => wgpu::BlendOperation::Subtract,
            Self::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            Self::Min => wgpu::BlendOperation::Min,
            Self::Max => wgpu::BlendOperation::Max,
        };
        // Min/Max ignore blend factors per the WebGPU spec; One/One keeps
        // validation happy for those ops.
        let (src, dst) = match self {
            Self::Min | Self::Max => (wgpu::BlendFactor::One, wgpu::BlendFactor::One),
            _ => (
                wgpu::BlendFactor::SrcAlpha,
                wgpu::BlendFactor::OneMinusSrcAlpha,
            ),
        };
        let component = wgpu::BlendComponent {
            src_factor: src,
            dst_factor: dst,
            operation: op,
        };
        Some(wgpu::BlendState {
            color: component,
            alpha: component,
        })
    }
}

/// Polygon rasterization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Rasterize vertices as points.
    Point,
    /// Rasterize polygon edges.
    Line,
    /// Filled polygons — the default.
    #[default]
    Fill,
}

impl FillMode {
    /// Map a public-API fill id (0 = point, 1 = line, 2 = fill).
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Self::Point,
            1 => Self::Line,
            _ => Self::Fill,
        }
    }

    #[must_use]
    pub fn polygon_mode(self) -> wgpu::PolygonMode {
        match self {
            Self::Point => wgpu::PolygonMode::Point,
            Self::Line => wgpu::PolygonMode::Line,
            Self::Fill => wgpu::PolygonMode::Fill,
        }
    }
}

/// Pipeline-level options applied when shader stages build their pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineOptions {
    pub blend: BlendMode,
    pub fill: FillMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_off_has_no_state() {
        assert!(BlendMode::Off.blend_state().is_none());
        assert!(BlendMode::Add.blend_state().is_some());
    }

    #[test]
    fn unknown_blend_id_falls_back_to_add() {
        assert_eq!(BlendMode::from_id(42), BlendMode::Add);
    }
}
