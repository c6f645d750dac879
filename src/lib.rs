//! Strata — a data-driven, staged rendering backend.
//!
//! The hard core of the crate is the render-pass / shader-stage pipeline:
//! a scheduler that organizes GPU work into six ordered stages, resolves
//! named shader uniforms and buffers dynamically, manages a pool of
//! framebuffer targets, and supports both immediate and stored
//! (deferred, instanced) rendering.
//!
//! ```rust,ignore
//! use strata::{Renderer, RendererSettings, RenderStage};
//! use std::sync::Arc;
//!
//! let mut renderer = Renderer::new(RendererSettings::default())?;
//! renderer.register_window(window, "Primary Window")?;
//! renderer.register_callback(RenderStage::PrimaryRender, 0, Arc::new(|r| {
//!     r.draw_rect(glam::Vec2::ZERO, glam::Vec2::splat(100.0), 0.0, 1).is_err() as i32
//! }));
//! while renderer.running {
//!     renderer.update()?;
//! }
//! ```

pub mod camera;
pub mod errors;
pub mod gpu;
pub mod mesh;
pub mod pass;
pub mod renderer;
pub mod settings;
pub mod text;
pub mod texture;
pub mod window;

pub use camera::Camera;
pub use errors::{ErrorState, Result, StrataError};
pub use gpu::GpuContext;
pub use mesh::{DrawMode, Mesh, MeshId, MeshKind, MeshRegistry, Vertex};
pub use pass::builtin::BuiltinStage;
pub use pass::schedule::{PassSchedule, RenderCallback};
pub use pass::shader_stage::{ShaderStage, StageFlags, UniformTag, UniformValue};
pub use pass::stage::RenderStage;
pub use pass::{BoundTarget, RenderPass};
pub use renderer::stored::{MaterialRecord, MaterialTable, RenderInformation};
pub use renderer::{Projection, Renderer};
pub use settings::{BlendMode, FillMode, PipelineOptions, RendererSettings};
pub use text::{FontId, FontInfo, RasterizedText, TextRasterizer};
pub use texture::{TextureId, TextureRegistry, TextureUnits};
pub use window::{RenderWindow, WindowKey};
