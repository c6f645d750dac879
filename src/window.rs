//! Render Windows
//!
//! Per-window GPU state: the surface, its configuration, a depth buffer
//! matching the window size, the per-window clear color, and the cached
//! vertex-array name that gets invalidated whenever the active render pass
//! is replaced.
//!
//! Window *creation* and event translation belong to the host application
//! (winit or otherwise); the backend adopts an already-created window and
//! only consumes resize notifications.

use std::sync::Arc;

use winit::window::Window;

use crate::errors::{Result, StrataError};
use crate::gpu::GpuContext;
use crate::pass::target::DEPTH_FORMAT;

slotmap::new_key_type! {
    /// Handle to a window registered with the renderer.
    pub struct WindowKey;
}

/// A window the renderer can draw into and present.
pub struct RenderWindow {
    window: Option<Arc<Window>>,
    surface: Option<wgpu::Surface<'static>>,
    config: wgpu::SurfaceConfiguration,
    depth_view: wgpu::TextureView,

    /// Swapchain texture for the in-flight frame, acquired lazily on the
    /// first draw that targets this window.
    frame: Option<wgpu::SurfaceTexture>,
    frame_view: Option<wgpu::TextureView>,

    pub name: String,
    pub primary: bool,
    pub clear_color: wgpu::Color,
    /// Cached vertex-array name on the active pass; `None` forces lazy
    /// re-creation on the next draw.
    pub vao: Option<String>,
}

impl RenderWindow {
    /// Adopt a host-created window: create and configure its surface and
    /// allocate a matching depth buffer.
    pub fn new(
        gpu: &GpuContext,
        window: Arc<Window>,
        name: String,
        primary: bool,
        vsync: bool,
        clear_color: wgpu::Color,
    ) -> Result<Self> {
        let size = window.inner_size();
        let surface = gpu.instance.create_surface(window.clone())?;
        let mut config = surface
            .get_default_config(&gpu.adapter, size.width.max(1), size.height.max(1))
            .ok_or(StrataError::SurfaceUnsupported)?;
        config.present_mode = if vsync {
            wgpu::PresentMode::AutoVsync
        } else {
            wgpu::PresentMode::AutoNoVsync
        };
        surface.configure(&gpu.device, &config);
        let depth_view = create_depth(gpu, &config);

        log::info!("Window registered: {name} ({}x{})", config.width, config.height);

        Ok(Self {
            window: Some(window),
            surface: Some(surface),
            config,
            depth_view,
            frame: None,
            frame_view: None,
            name,
            primary,
            clear_color,
            vao: None,
        })
    }

    /// Whether the window can still be rendered into.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.window.is_some() && self.surface.is_some()
    }

    /// Release the surface and window handle. The entry stays registered
    /// so stale keys resolve to a dead window rather than dangling.
    pub fn destroy(&mut self) {
        self.frame_view = None;
        self.frame = None;
        self.surface = None;
        self.window = None;
    }

    #[must_use]
    pub fn winit_window(&self) -> Option<&Arc<Window>> {
        self.window.as_ref()
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    #[must_use]
    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    #[must_use]
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Reconfigure the surface and depth buffer at a new size. Any
    /// in-flight frame is dropped — it belongs to the old swapchain.
    pub fn resize(&mut self, gpu: &GpuContext, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.frame_view = None;
        self.frame = None;
        self.config.width = width;
        self.config.height = height;
        if let Some(surface) = &self.surface {
            surface.configure(&gpu.device, &self.config);
        }
        self.depth_view = create_depth(gpu, &self.config);
    }

    /// The view for this frame's swapchain texture, acquiring and clearing
    /// it on first use.
    pub fn acquire(&mut self, gpu: &GpuContext) -> Option<&wgpu::TextureView> {
        if self.frame.is_none() {
            let surface = self.surface.as_ref()?;
            let frame = match surface.get_current_texture() {
                wgpu::CurrentSurfaceTexture::Success(frame)
                | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => frame,
                wgpu::CurrentSurfaceTexture::Lost | wgpu::CurrentSurfaceTexture::Outdated => {
                    surface.configure(&gpu.device, &self.config);
                    match surface.get_current_texture() {
                        wgpu::CurrentSurfaceTexture::Success(frame)
                        | wgpu::CurrentSurfaceTexture::Suboptimal(frame) => frame,
                        _ => return None,
                    }
                }
                other => {
                    log::error!("Frame acquire failed on '{}': {other:?}", self.name);
                    return None;
                }
            };
            let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

            // Clear color and depth now so every later draw can load.
            let mut encoder = gpu
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Window Clear"),
                });
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Window Clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
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
            gpu.queue.submit(std::iter::once(encoder.finish()));

            self.frame = Some(frame);
            self.frame_view = Some(view);
        }
        self.frame_view.as_ref()
    }

    /// Present the in-flight frame, if one was acquired.
    pub fn present(&mut self) {
        self.frame_view = None;
        if let Some(frame) = self.frame.take() {
            frame.present();
        }
    }
}

fn create_depth(gpu: &GpuContext, config: &wgpu::SurfaceConfiguration) -> wgpu::TextureView {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Window Depth"),
        size: wgpu::Extent3d {
            width: config.width,
            height: config.height,
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
