//! Framebuffer Targets
//!
//! Offscreen render targets — a color texture plus a depth-stencil texture
//! — standing in for the primary/secondary/extra framebuffer objects of the
//! render pass. Targets are allocated at window size and re-allocated on
//! resize; a target whose allocation lags behind the window (a resize
//! race) reports itself incomplete, and draws against it silently skip.

use crate::gpu::{GpuContext, next_resource_id};

/// Color format of every framebuffer target.
pub const TARGET_COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Depth-stencil format shared by targets and window depth buffers.
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// An offscreen color + depth-stencil target.
pub struct RenderTarget {
    id: u64,
    label: String,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    width: u32,
    height: u32,
}

impl RenderTarget {
    pub fn new(gpu: &GpuContext, label: &str, width: u32, height: u32) -> Self {
        let (color, color_view) = Self::make_color(gpu, label, width, height);
        let depth_view = Self::make_depth(gpu, label, width, height);
        Self {
            id: next_resource_id(),
            label: label.to_string(),
            color,
            color_view,
            depth_view,
            width,
            height,
        }
    }

    /// Unique id of the current allocation; changes on every resize.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    #[must_use]
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    #[must_use]
    pub fn color_texture(&self) -> &wgpu::Texture {
        &self.color
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// A target is complete when its allocation matches the expected
    /// window dimensions. Incomplete targets are skipped by draws until
    /// the next [`resize`](Self::resize).
    #[must_use]
    pub fn is_complete(&self, expected: (u32, u32)) -> bool {
        (self.width, self.height) == expected
    }

    /// Re-allocate color and depth storage at new dimensions.
    pub fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        if width == 0 || height == 0 || (width, height) == (self.width, self.height) {
            return;
        }
        let (color, color_view) = Self::make_color(gpu, &self.label, width, height);
        self.color = color;
        self.color_view = color_view;
        self.depth_view = Self::make_depth(gpu, &self.label, width, height);
        self.width = width;
        self.height = height;
        self.id = next_resource_id();
    }

    /// Encode a clear of this target to transparent black and far depth.
    pub fn clear(&self, encoder: &mut wgpu::CommandEncoder) {
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Target Clear"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &self.color_view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: &self.depth_view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                }),
            }),
            ..Default::default()
        });
    }

    fn make_color(
        gpu: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }

    fn make_depth(gpu: &GpuContext, label: &str, width: u32, height: u32) -> wgpu::TextureView {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

/// How a caller-supplied framebuffer name resolves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FboName {
    /// `"Primary N"` / `"Secondary N"` map to the fixed slot indices
    /// 0–2 and 3–5 respectively.
    Indexed(i32),
    /// Anything else resolves through the extras table.
    Named(String),
}

/// Decode the framebuffer naming convention used by the public API.
#[must_use]
pub fn parse_fbo_name(name: &str) -> FboName {
    for (keyword, offset) in [("Primary", 0), ("Secondary", 3)] {
        if let Some(rest) = name.split(keyword).nth(1)
            && let Ok(index) = rest.trim().parse::<i32>()
        {
            return FboName::Indexed(index + offset);
        }
    }
    FboName::Named(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_names_map_to_low_slots() {
        assert_eq!(parse_fbo_name("Primary 0"), FboName::Indexed(0));
        assert_eq!(parse_fbo_name("Primary 2"), FboName::Indexed(2));
    }

    #[test]
    fn secondary_names_are_offset_by_three() {
        assert_eq!(parse_fbo_name("Secondary 0"), FboName::Indexed(3));
        assert_eq!(parse_fbo_name("Secondary 2"), FboName::Indexed(5));
    }

    #[test]
    fn other_names_resolve_through_extras() {
        assert_eq!(
            parse_fbo_name("bloomTarget"),
            FboName::Named("bloomTarget".to_string())
        );
    }
}
