//! Renderer
//!
//! The top-level orchestrator: owns the GPU context, the registered
//! windows, the active [`RenderPass`], the camera and projection state,
//! the mesh/texture/font registries, and the stored-render accumulation
//! state. The public draw API lives here; host applications drive one
//! [`Renderer::update`] per frame and register callbacks for the stages
//! they want to draw in.
//!
//! # Immediate vs stored rendering
//!
//! Draw calls are semantically identical in both modes. In immediate mode
//! they encode GPU work against the currently bound target right away; in
//! stored mode they only mutate in-process state (the current-object
//! record, per-mesh instance batches) until the stored pass's drain
//! callback flushes every batch in one instanced draw per mesh.

pub mod stored;

use std::path::Path;
use std::sync::Arc;

use glam::{Mat3, Mat4, Vec2, Vec3, Vec4};
use slotmap::SlotMap;

use crate::camera::Camera;
use crate::errors::{ErrorState, Result, StrataError};
use crate::gpu::GpuContext;
use crate::mesh::{DrawMode, Mesh, MeshId, MeshKind, MeshRegistry, Vertex, prepare_vertices};
use crate::pass::schedule::RenderCallback;
use crate::pass::shader_stage::UniformValue;
use crate::pass::stage::RenderStage;
use crate::pass::target::{FboName, RenderTarget, TARGET_COLOR_FORMAT, parse_fbo_name};
use crate::pass::{DEFAULT_PASS, RenderPass};
use crate::settings::{BlendMode, FillMode, PipelineOptions, RendererSettings};
use crate::text::{FontId, Fonts, TextRasterizer};
use crate::texture::{TextureId, TextureRegistry, TextureUnits};
use crate::window::{RenderWindow, WindowKey};

use self::stored::{MaterialTable, RenderInformation};

/// Projection mode of the main camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Projection {
    /// Symmetric orthogonal frustum sized to the window.
    #[default]
    Orthogonal,
    /// Fixed 120° vertical field of view from the camera position.
    Perspective,
}

impl Projection {
    /// Decode a public-API projection id.
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        if id == 1 { Self::Perspective } else { Self::Orthogonal }
    }
}

/// Build the object matrix of the draw API:
/// `translate · rotZ · rotX · rotY · scale`, rotations in radians, Z
/// applied first.
#[must_use]
pub fn build_object_matrix(pos: Vec3, scale: Vec3, rot: Vec3) -> Mat4 {
    Mat4::from_translation(pos)
        * Mat4::from_rotation_z(rot.z)
        * Mat4::from_rotation_x(rot.x)
        * Mat4::from_rotation_y(rot.y)
        * Mat4::from_scale(scale)
}

/// Inverse-transpose of the model's upper 3×3, widened back to 4×4 for
/// uniform upload.
#[must_use]
pub fn normal_matrix(model: Mat4) -> Mat4 {
    Mat4::from_mat3(Mat3::from_mat4(model).inverse().transpose())
}

/// Screen-space point to world space under the 2D camera convention.
#[must_use]
pub fn world_from_screen(src: Vec2, window_size: Vec2, zoom: f32, camera_pos: Vec2) -> Vec2 {
    ((src * Vec2::new(1.0, -1.0)) + Vec2::new(-window_size.x / 2.0, window_size.y / 2.0))
        * (1.0 / zoom)
        - camera_pos
}

/// Inverse of [`world_from_screen`].
#[must_use]
pub fn screen_from_world(src: Vec2, window_size: Vec2, zoom: f32, camera_pos: Vec2) -> Vec2 {
    src + camera_pos * zoom
        + Vec2::new(window_size.x / 2.0, -window_size.y / 2.0) * Vec2::new(1.0, -1.0)
}

/// Attachments an immediate draw lands in.
struct DrawSurface {
    view: wgpu::TextureView,
    depth: Option<wgpu::TextureView>,
    format: wgpu::TextureFormat,
}

pub struct Renderer {
    pub gpu: GpuContext,
    settings: RendererSettings,

    windows: SlotMap<WindowKey, RenderWindow>,
    default_window: Option<WindowKey>,
    active_window: Option<WindowKey>,

    pass: RenderPass,
    options: PipelineOptions,

    camera: Camera,
    projection: Projection,
    zoom: f32,
    projection_matrix: Mat4,
    /// Projection composed with the camera — what `screenMatrix` carries.
    stored_projection: Mat4,
    window_size: Vec2,

    stored_render: bool,
    shadows: bool,
    current_object: RenderInformation,
    materials: MaterialTable,

    meshes: MeshRegistry,
    textures: TextureRegistry,
    fonts: Fonts,
    active_font: Option<FontId>,
    units: TextureUnits,

    render_mode: DrawMode,
    light_direction: Vec3,
    light_color: Vec4,
    light_matrix: Mat4,

    error_state: ErrorState,
    frame_index: u64,
    pub running: bool,
}

impl Renderer {
    /// Bring up the GPU and the built-in immediate-mode render pass.
    pub fn new(settings: RendererSettings) -> Result<Self> {
        let gpu = GpuContext::new()?;
        let options = PipelineOptions::default();
        let size = (settings.width, settings.height);
        let pass = RenderPass::new(&gpu, size, options)?;

        Ok(Self {
            gpu,
            window_size: Vec2::new(settings.width as f32, settings.height as f32),
            settings,
            windows: SlotMap::with_key(),
            default_window: None,
            active_window: None,
            pass,
            options,
            camera: Camera::default(),
            projection: Projection::Orthogonal,
            zoom: 1.0,
            projection_matrix: Mat4::IDENTITY,
            stored_projection: Mat4::IDENTITY,
            stored_render: false,
            shadows: false,
            current_object: RenderInformation::default(),
            materials: MaterialTable::default(),
            meshes: MeshRegistry::default(),
            textures: TextureRegistry::default(),
            fonts: Fonts::default(),
            active_font: None,
            units: TextureUnits::default(),
            render_mode: DrawMode::TriangleFan,
            light_direction: Vec3::new(0.0, -1.0, -1.0),
            light_color: Vec4::ONE,
            light_matrix: Mat4::IDENTITY,
            error_state: ErrorState::NoError,
            frame_index: 0,
            running: true,
        })
    }

    /// [`new`](Self::new) followed by [`load_render_pass`](Self::load_render_pass).
    pub fn with_render_pass(settings: RendererSettings, path: impl AsRef<Path>) -> Result<Self> {
        let mut renderer = Self::new(settings)?;
        renderer.load_render_pass(path)?;
        Ok(renderer)
    }

    // ── Windows ────────────────────────────────────────────────────────────

    /// Adopt a host-created window. The first registered window becomes
    /// the primary window the compositor presents into.
    pub fn register_window(
        &mut self,
        window: Arc<winit::window::Window>,
        name: impl Into<String>,
    ) -> Result<WindowKey> {
        let primary = self.default_window.is_none();
        let [r, g, b, a] = self.settings.clear_color;
        let render_window = RenderWindow::new(
            &self.gpu,
            window,
            name.into(),
            primary,
            self.settings.vsync,
            wgpu::Color { r, g, b, a },
        )?;
        let size = render_window.size();
        let key = self.windows.insert(render_window);
        if primary {
            self.default_window = Some(key);
            self.active_window = Some(key);
            self.window_size = Vec2::new(size.0 as f32, size.1 as f32);
            self.pass.resize_fbos(&self.gpu, size);
        }
        Ok(key)
    }

    #[must_use]
    pub fn window(&self, key: WindowKey) -> Option<&RenderWindow> {
        self.windows.get(key)
    }

    pub fn window_mut(&mut self, key: WindowKey) -> Option<&mut RenderWindow> {
        self.windows.get_mut(key)
    }

    #[must_use]
    pub fn default_window(&self) -> Option<WindowKey> {
        self.default_window
    }

    fn live_window_count(&self) -> usize {
        self.windows.values().filter(|w| w.is_live()).count()
    }

    /// Make a window the target of subsequent draws.
    ///
    /// A dead target triggers the fallback path: if the current window is
    /// also dead, the first live window takes over; with none left the run
    /// loop is halted instead.
    pub fn set_active_window(&mut self, key: WindowKey) -> Result<()> {
        if self.live_window_count() > 1 {
            self.gpu.flush();
        }
        let target_live = self.windows.get(key).is_some_and(RenderWindow::is_live);
        if !target_live {
            let active_live = self
                .active_window
                .and_then(|k| self.windows.get(k))
                .is_some_and(RenderWindow::is_live);
            if !active_live {
                if let Some(next) = self.windows.iter().find(|(_, w)| w.is_live()).map(|(k, _)| k)
                {
                    self.active_window = Some(next);
                    self.update_render_constants()?;
                } else {
                    self.running = false;
                }
            }
            return Ok(());
        }
        self.active_window = Some(key);
        self.update_render_constants()
    }

    /// Destroy a window's surface. The active-window fallback picks a
    /// replacement on the next [`set_active_window`](Self::set_active_window).
    pub fn destroy_window(&mut self, key: WindowKey) {
        if let Some(window) = self.windows.get_mut(key) {
            window.destroy();
        }
        if self.default_window == Some(key) {
            log::warn!("primary window destroyed; compositing disabled until shutdown");
        }
    }

    /// Handle a window-resize event: reconfigure the surface and, for the
    /// primary window, re-allocate every framebuffer target before the
    /// next draw cycle.
    pub fn handle_window_resize(&mut self, key: WindowKey, width: u32, height: u32) {
        let Some(window) = self.windows.get_mut(key) else {
            return;
        };
        window.resize(&self.gpu, width, height);
        if window.primary {
            self.window_size = Vec2::new(width as f32, height as f32);
            self.pass.resize_fbos(&self.gpu, (width, height));
        }
    }

    /// Toggle fullscreen (0 windowed, 1 fullscreen, 2 borderless) and
    /// synthesize the resize that re-allocates the targets.
    pub fn set_window_fullscreen(&mut self, key: WindowKey, mode: i32) {
        let Some(window) = self.windows.get(key).and_then(RenderWindow::winit_window) else {
            return;
        };
        let window = window.clone();
        window.set_fullscreen(match mode {
            0 => None,
            _ => Some(winit::window::Fullscreen::Borderless(None)),
        });
        let size = window.inner_size();
        self.handle_window_resize(key, size.width, size.height);
    }

    /// Maximize a window and synthesize the matching resize.
    pub fn set_window_maximized(&mut self, key: WindowKey) {
        let Some(window) = self.windows.get(key).and_then(RenderWindow::winit_window) else {
            return;
        };
        let window = window.clone();
        window.set_maximized(true);
        let size = window.inner_size();
        self.handle_window_resize(key, size.width, size.height);
    }

    /// Request a new window size and synthesize the matching resize.
    pub fn set_window_scale(&mut self, key: WindowKey, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if let Some(window) = self.windows.get(key).and_then(RenderWindow::winit_window) {
            let _ = window.request_inner_size(winit::dpi::PhysicalSize::new(width, height));
        }
        self.handle_window_resize(key, width, height);
    }

    pub fn set_window_position(&mut self, key: WindowKey, x: i32, y: i32) {
        if let Some(window) = self.windows.get(key).and_then(RenderWindow::winit_window) {
            window.set_outer_position(winit::dpi::PhysicalPosition::new(x, y));
        }
    }

    #[must_use]
    pub fn get_window_size(&self, key: WindowKey) -> Vec2 {
        self.windows
            .get(key)
            .map_or(Vec2::ZERO, |w| Vec2::new(w.size().0 as f32, w.size().1 as f32))
    }

    // ── Render pass ────────────────────────────────────────────────────────

    /// Replace the active render pass with one loaded from a description
    /// file. Every window's cached vertex-array name is invalidated.
    pub fn load_render_pass(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let size = self.pass.expected_size();
        self.pass = RenderPass::from_file(&self.gpu, path.as_ref(), size, self.options)?;
        self.invalidate_window_vaos();
        Ok(())
    }

    #[must_use]
    pub fn pass(&self) -> &RenderPass {
        &self.pass
    }

    pub fn pass_mut(&mut self) -> &mut RenderPass {
        &mut self.pass
    }

    /// Register a per-stage callback (see [`crate::pass::schedule`]).
    pub fn register_callback(&mut self, stage: RenderStage, id: i32, callback: RenderCallback) {
        self.pass.register_callback(stage, id, callback);
    }

    /// Activate the named shader pass if it exists.
    pub fn query_and_set(&mut self, name: &str) -> bool {
        self.pass.query_stage(name) && self.pass.set_specific_stage(name).is_ok()
    }

    fn invalidate_window_vaos(&mut self) {
        for window in self.windows.values_mut() {
            window.vao = None;
        }
    }

    // ── Stored rendering ───────────────────────────────────────────────────

    /// Switch between the immediate pass and the instanced stored pass.
    ///
    /// Enabling registers the drain callback that flushes every live
    /// mesh's batch once per `PrimaryRender` stage.
    pub fn enable_stored_render(&mut self, enable: bool) -> Result<()> {
        if enable == self.stored_render {
            return Ok(());
        }
        let size = self.pass.expected_size();
        if enable {
            self.pass = RenderPass::stored(&self.gpu, size, self.options, self.shadows)?;
            self.pass.register_callback(
                RenderStage::PrimaryRender,
                0,
                Arc::new(|renderer: &mut Renderer| renderer.flush_stored_batches()),
            );
            if self.shadows {
                self.pass.register_callback(
                    RenderStage::PreRender,
                    0,
                    Arc::new(|renderer: &mut Renderer| renderer.flush_shadow_batches()),
                );
            }
        } else {
            self.pass = RenderPass::new(&self.gpu, size, self.options)?;
        }
        self.stored_render = enable;
        self.invalidate_window_vaos();
        Ok(())
    }

    #[must_use]
    pub fn stored_render(&self) -> bool {
        self.stored_render
    }

    /// Whether stored passes carry a shadow stage. Rebuilds the stored
    /// pass when toggled mid-run.
    pub fn set_shadows(&mut self, enable: bool) -> Result<()> {
        if self.shadows == enable {
            return Ok(());
        }
        self.shadows = enable;
        if self.stored_render {
            self.stored_render = false;
            self.enable_stored_render(true)?;
        }
        Ok(())
    }

    /// Directional light consumed by the stored-render shader.
    pub fn set_light(&mut self, direction: Vec3, color: Vec4) {
        self.light_direction = direction;
        self.light_color = color;
    }

    /// Light-space matrix consumed by the shadow stage.
    pub fn set_light_matrix(&mut self, matrix: Mat4) {
        self.light_matrix = matrix;
    }

    /// Record (stored mode) or ignore a material, returning its table
    /// index. Identical `(diffuse, specular, exponent)` triples map to the
    /// same index; the table grows only for new triples.
    pub fn set_material(&mut self, diffuse: Vec4, specular: Vec4, exponent: f32) -> u32 {
        let index = self.materials.intern(diffuse, specular, exponent);
        if self.stored_render {
            self.current_object.material = index;
        }
        index
    }

    #[must_use]
    pub fn materials(&self) -> &MaterialTable {
        &self.materials
    }

    // ── Matrix / color / texture state ─────────────────────────────────────

    /// Set the object transform for subsequent draws.
    ///
    /// Immediate mode writes the `objectMatrix`/`normalMatrix` uniforms
    /// right away; stored mode caches the pair into the current-object
    /// record flushed by the next `draw_mesh`.
    pub fn set_matrix(&mut self, pos: Vec3, scale: Vec3, rot: Vec3) -> Result<()> {
        let matrix = build_object_matrix(pos, scale, rot);
        self.set_matrix_direct(matrix)
    }

    /// 2D convenience: position/scale on the plane, rotation about Z.
    pub fn set_matrix_2d(&mut self, pos: Vec2, scale: Vec2, rot: f32) -> Result<()> {
        self.set_matrix(pos.extend(0.0), scale.extend(1.0), Vec3::new(0.0, 0.0, rot))
    }

    /// Set a caller-built object matrix.
    pub fn set_matrix_direct(&mut self, matrix: Mat4) -> Result<()> {
        let normal = normal_matrix(matrix);
        if self.stored_render {
            self.current_object.model = matrix;
            self.current_object.normal = normal;
            return Ok(());
        }
        if !self.pass.query_attribute("objectMatrix") {
            return Err(self.missing_uniform("objectMatrix"));
        }
        self.pass.write_attribute("objectMatrix", matrix.into());
        self.pass.write_attribute("normalMatrix", normal.into());
        Ok(())
    }

    /// Set the draw tint. Immediate mode writes `globalColor`; stored mode
    /// records the tint into the current-object record.
    pub fn set_color(&mut self, color: Vec4) -> Result<()> {
        if self.stored_render {
            self.current_object.color = color;
            return Ok(());
        }
        if !self.pass.query_attribute("globalColor") {
            return Err(self.missing_uniform("globalColor"));
        }
        self.pass.write_attribute("globalColor", color.into());
        Ok(())
    }

    /// Bind a texture (unit 0) for subsequent draws, or unbind with
    /// `None`. The active stage must declare `textured` and `tex`.
    pub fn set_active_texture(&mut self, texture: Option<TextureId>) -> Result<()> {
        if !self.pass.query_attribute("textured") {
            return Err(self.missing_uniform("textured"));
        }
        if !self.pass.query_attribute("tex") {
            return Err(self.missing_uniform("tex"));
        }
        match texture.and_then(|id| self.textures.get(id).map(|t| (t.id(), t.view().clone()))) {
            Some((id, view)) => {
                self.units.set(0, id, view);
                if let Some(id) = texture {
                    self.textures.touch(id);
                }
                self.pass.write_attribute("tex", UniformValue::Sampler(0));
                self.pass.write_attribute("textured", UniformValue::Int(1));
            }
            None => {
                self.units.clear(0);
                self.pass.write_attribute("textured", UniformValue::Int(0));
            }
        }
        Ok(())
    }

    /// Bind a texture to an arbitrary unit for custom shaders.
    pub fn bind_texture_to_unit(&mut self, texture: TextureId, unit: i32) -> Result<()> {
        if !(0..crate::texture::TEXTURE_UNITS as i32).contains(&unit) {
            return Err(StrataError::InvalidTextureUnit(unit));
        }
        if let Some(entry) = self.textures.get(texture) {
            let (id, view) = (entry.id(), entry.view().clone());
            self.units.set(unit as u32, id, view);
            self.textures.touch(texture);
        }
        Ok(())
    }

    // ── Draw API ───────────────────────────────────────────────────────────

    /// Draw a unit rectangle at `pos` with the given scale and Z rotation
    /// into layer `layer` (0 background, 1 content, 2 UI; `u32::MAX`
    /// draws into whatever target is bound).
    pub fn draw_rect(&mut self, pos: Vec2, scale: Vec2, rot: f32, layer: u32) -> Result<()> {
        let quad = [
            Vertex::new(Vec4::new(-0.5, -0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(0.0, 1.0)),
            Vertex::new(Vec4::new(-0.5, 0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(0.0, 0.0)),
            Vertex::new(Vec4::new(0.5, 0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(1.0, 0.0)),
            Vertex::new(Vec4::new(0.5, -0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(1.0, 1.0)),
        ];
        self.set_matrix_2d(pos, scale, rot)?;
        self.draw_vertices(&quad, layer, self.render_mode)
    }

    /// Draw a line segment into `layer`.
    pub fn draw_line(&mut self, from: Vec2, to: Vec2, layer: u32) -> Result<()> {
        let line = [
            Vertex::new(from.extend(0.0).extend(1.0), Vec4::ONE, Vec2::ZERO),
            Vertex::new(to.extend(0.0).extend(1.0), Vec4::ONE, Vec2::ONE),
        ];
        self.set_matrix(Vec3::ZERO, Vec3::ONE, Vec3::ZERO)?;
        self.draw_vertices(&line, layer, DrawMode::Lines)
    }

    /// Upload raw vertices into the active stage's vertex buffer and draw
    /// them immediately.
    ///
    /// In stored mode raw-vertex draws are meaningless (there is no mesh
    /// batch to append to) and are skipped with a warning.
    pub fn draw_vertices(&mut self, vertices: &[Vertex], layer: u32, mode: DrawMode) -> Result<()> {
        if self.stored_render {
            log::warn!("draw_vertices ignored while stored rendering is enabled");
            return Ok(());
        }
        if layer != u32::MAX {
            self.bind_layer(layer)?;
        }
        self.ensure_window_vao();
        let Some(surface) = self.immediate_surface() else {
            return Ok(());
        };

        let (expanded, effective_mode) = prepare_vertices(vertices, mode);
        let vao = self.active_window_vao();
        if let Some(vao) = &vao {
            self.pass.bind_buffer(vao);
        }
        self.pass.bind_buffer("VBO");
        {
            let Self { gpu, pass, .. } = self;
            pass.write_buffer(gpu, "VBO", bytemuck::cast_slice(&expanded));
        }
        {
            let Self { gpu, pass, units, .. } = self;
            if let Some(stage) = pass.active_stage_mut() {
                stage.encode_draw(
                    gpu,
                    effective_mode,
                    surface.format,
                    &surface.view,
                    surface.depth.as_ref(),
                    units,
                    0..expanded.len() as u32,
                    0..1,
                );
            }
        }
        self.pass.unbind_buffer("VBO");
        if let Some(vao) = &vao {
            self.pass.unbind_buffer(vao);
        }
        self.restore_ui_projection(layer);
        Ok(())
    }

    /// Draw a mesh object. Stored mode appends the current-object record
    /// to the mesh's batch; immediate mode encodes the draw now.
    pub fn draw_mesh(&mut self, id: MeshId, layer: u32) -> Result<()> {
        if self.stored_render {
            let info = self.current_object;
            if let Some(mesh) = self.meshes.get_mut(id) {
                mesh.add_call(info);
            }
            return Ok(());
        }
        self.draw_mesh_instanced(id, layer, 1)
    }

    /// Immediate instanced draw of a mesh's vertices.
    pub fn draw_mesh_instanced(&mut self, id: MeshId, layer: u32, instances: u32) -> Result<()> {
        if layer != u32::MAX {
            self.bind_layer(layer)?;
        }
        self.ensure_window_vao();

        let (kind, color) = match self.meshes.get(id) {
            Some(mesh) => (mesh.kind(), mesh.color()),
            None => return Ok(()),
        };
        self.set_color(color)?;
        match kind {
            MeshKind::Textured { texture } => self.set_active_texture(texture)?,
            MeshKind::Plain => self.set_active_texture(None)?,
        }

        let Some(surface) = self.immediate_surface() else {
            return Ok(());
        };
        {
            let Self {
                gpu,
                pass,
                meshes,
                units,
                ..
            } = self;
            let Some(mesh) = meshes.get_mut(id) else {
                return Ok(());
            };
            let (buffer, count, mode) = mesh.ensure_gpu(gpu);
            let buffer = buffer.clone();
            if let Some(stage) = pass.active_stage_mut() {
                stage.encode_draw_with_buffer(
                    gpu,
                    mode,
                    surface.format,
                    &surface.view,
                    surface.depth.as_ref(),
                    units,
                    &buffer,
                    0..count,
                    0..instances,
                );
            }
        }
        self.restore_ui_projection(layer);
        Ok(())
    }

    /// Immediate instanced draw of raw vertices (`count` instances).
    pub fn draw_indexed(&mut self, vertices: &[Vertex], count: u32, mode: DrawMode) -> Result<()> {
        self.bind_layer(1)?;
        self.ensure_window_vao();
        let Some(surface) = self.immediate_surface() else {
            return Ok(());
        };
        let (expanded, effective_mode) = prepare_vertices(vertices, mode);
        let vao = self.active_window_vao();
        if let Some(vao) = &vao {
            self.pass.bind_buffer(vao);
        }
        {
            let Self { gpu, pass, .. } = self;
            pass.bind_buffer("VBO");
            pass.write_buffer(gpu, "VBO", bytemuck::cast_slice(&expanded));
        }
        {
            let Self { gpu, pass, units, .. } = self;
            if let Some(stage) = pass.active_stage_mut() {
                stage.encode_draw(
                    gpu,
                    effective_mode,
                    surface.format,
                    &surface.view,
                    surface.depth.as_ref(),
                    units,
                    0..expanded.len() as u32,
                    0..count,
                );
            }
        }
        self.pass.unbind_buffer("VBO");
        if let Some(vao) = &vao {
            self.pass.unbind_buffer(vao);
        }
        Ok(())
    }

    // ── Mesh / texture / font registries ───────────────────────────────────

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.insert(mesh)
    }

    pub fn meshes_mut(&mut self) -> &mut MeshRegistry {
        &mut self.meshes
    }

    #[must_use]
    pub fn meshes(&self) -> &MeshRegistry {
        &self.meshes
    }

    /// Upload decoded RGBA8 pixels as a texture. Failure is informational:
    /// returns `None` and sets the error state.
    pub fn load_texture(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Option<TextureId> {
        let id = self
            .textures
            .create_from_memory(&self.gpu, name, width, height, pixels);
        if id.is_none() {
            self.error_state = ErrorState::InitFailure;
        }
        id
    }

    #[must_use]
    pub fn textures(&self) -> &TextureRegistry {
        &self.textures
    }

    pub fn set_text_rasterizer(&mut self, rasterizer: Box<dyn TextRasterizer>) {
        self.fonts.set_rasterizer(rasterizer);
    }

    /// Register a font face; `None` (plus `FontLoadFailure`) without a
    /// rasterizer installed.
    pub fn load_font(&mut self, name: &str, size: u32) -> Option<FontId> {
        let id = self.fonts.load(name, size);
        if id.is_none() {
            self.error_state = ErrorState::FontLoadFailure;
        }
        id
    }

    pub fn set_active_font(&mut self, font: Option<FontId>) {
        self.active_font = font;
    }

    #[must_use]
    pub fn active_font(&self) -> Option<FontId> {
        self.active_font
    }

    /// Rasterize text with the active font into a cached texture.
    pub fn render_text(&mut self, text: &str, color: Vec4) -> Option<TextureId> {
        let font = self.active_font?;
        let name = format!("text:{text}");
        if let Some(id) = self.textures.lookup(&name) {
            self.textures.touch(id);
            return Some(id);
        }
        let Some(raster) = self.fonts.rasterize(font, text, color) else {
            self.error_state = ErrorState::FontLoadFailure;
            return None;
        };
        let id = self.textures.create_from_memory(
            &self.gpu,
            &name,
            raster.width,
            raster.height,
            &raster.pixels,
        );
        if id.is_none() {
            self.error_state = ErrorState::FontLoadFailure;
        }
        id
    }

    // ── Camera / projection ────────────────────────────────────────────────

    #[must_use]
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn set_projection_mode(&mut self, projection: Projection) {
        self.projection = projection;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom;
        self.camera.set_zoom(zoom);
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Screen-space point to world space for the active window.
    #[must_use]
    pub fn to_world_space(&self, src: Vec2) -> Vec2 {
        world_from_screen(src, self.window_size, self.zoom, self.camera.position())
    }

    /// World-space point to screen space for the active window.
    #[must_use]
    pub fn to_screen_space(&self, src: Vec2) -> Vec2 {
        screen_from_world(src, self.window_size, self.zoom, self.camera.position())
    }

    // ── Pipeline options / misc state ──────────────────────────────────────

    /// Primitive used by [`draw_rect`](Self::draw_rect).
    pub fn set_default_render_mode(&mut self, mode: DrawMode) {
        self.render_mode = mode;
    }

    /// Select the blend equation; rebuilds stage pipelines.
    pub fn set_blend_mode(&mut self, mode: BlendMode) {
        self.options.blend = mode;
        let options = self.options;
        let Self { gpu, pass, .. } = self;
        pass.set_options(gpu, options);
    }

    /// Select the polygon fill mode; rebuilds stage pipelines.
    pub fn set_fill_mode(&mut self, mode: FillMode) {
        self.options.fill = mode;
        let options = self.options;
        let Self { gpu, pass, .. } = self;
        pass.set_options(gpu, options);
    }

    #[must_use]
    pub fn error_state(&self) -> ErrorState {
        self.error_state
    }

    pub fn clear_error_state(&mut self) {
        self.error_state = ErrorState::NoError;
    }

    /// Halt the run loop and release every window.
    pub fn shutdown(&mut self) {
        self.running = false;
        for window in self.windows.values_mut() {
            window.destroy();
        }
    }

    // ── Custom buffers / compute ───────────────────────────────────────────

    /// Bind, fill and unbind a named buffer on the active stage.
    pub fn write_buffer(&mut self, name: &str, data: &[u8]) {
        let Self { gpu, pass, .. } = self;
        pass.bind_buffer(name);
        pass.write_buffer(gpu, name, data);
        pass.unbind_buffer(name);
    }

    /// Write one array element of a named buffer.
    pub fn write_sub_buffer_data(&mut self, name: &str, index: u32, stride: u64, data: &[u8]) {
        let Self { gpu, pass, .. } = self;
        pass.bind_buffer(name);
        pass.write_sub_buffer_data(gpu, name, index, stride, data);
        pass.unbind_buffer(name);
    }

    /// Reassign a buffer's storage binding index.
    pub fn set_buffer_base(&mut self, name: &str, base: u32) {
        self.pass.set_buffer_base(name, base);
    }

    /// Read a named buffer on the active stage back to the CPU. Blocks on
    /// the GPU.
    #[must_use]
    pub fn read_buffer(&self, name: &str) -> Option<Vec<u8>> {
        self.pass.read_buffer(&self.gpu, name)
    }

    /// Write a uniform on the active stage.
    pub fn write_uniform(&mut self, name: &str, value: UniformValue) {
        self.pass.write_attribute(name, value);
    }

    /// Dispatch compute work on the active stage.
    pub fn dispatch_compute(&mut self, x: u32, y: u32, z: u32) {
        let Self { gpu, pass, .. } = self;
        pass.dispatch_compute(gpu, x, y, z);
    }

    // ── FBO access ─────────────────────────────────────────────────────────

    /// Resolve a framebuffer by the public naming convention
    /// (`"Primary N"`, `"Secondary N"`, or an extras name).
    #[must_use]
    pub fn fbo_by_name(&self, name: &str) -> Option<&RenderTarget> {
        match parse_fbo_name(name) {
            FboName::Indexed(id) => self.pass.frame_buffer(id),
            FboName::Named(named) => self.pass.frame_buffer_named(&named),
        }
    }

    /// Bind a framebuffer slot for subsequent draws.
    pub fn bind_fbo(&mut self, id: i32) -> Result<()> {
        self.pass.bind_active_fbo(id)
    }

    /// Clear a framebuffer by name, skipping silently when it is
    /// incomplete mid-resize.
    pub fn clear_fbo(&mut self, name: &str) {
        let expected = self.pass.expected_size();
        let Some(target) = self.fbo_by_name(name) else {
            return;
        };
        if !target.is_complete(expected) {
            return;
        }
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("FBO Clear"),
            });
        target.clear(&mut encoder);
        self.gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Create an extra framebuffer target at runtime, returning its slot
    /// id.
    pub fn make_fbo(&mut self, name: &str) -> i32 {
        let Self { gpu, pass, .. } = self;
        pass.make_fbo(gpu, name)
    }

    /// Re-allocate one extra target by name.
    pub fn resize_specific_fbo(&mut self, name: &str, size: (u32, u32)) {
        let Self { gpu, pass, .. } = self;
        pass.resize_specific_fbo(gpu, name, size);
    }

    /// Re-allocate every framebuffer target at the current window size.
    pub fn resize_fbos(&mut self) {
        let size = self
            .active_window
            .and_then(|key| self.windows.get(key))
            .map_or(self.pass.expected_size(), RenderWindow::size);
        self.pass.resize_fbos(&self.gpu, size);
    }

    // ── Frame driver ───────────────────────────────────────────────────────

    /// Drive one frame: run every stage's callbacks in order, flatten the
    /// primary targets onto the default window, present all windows, and
    /// reset the pass for the next frame.
    pub fn update(&mut self) -> Result<()> {
        loop {
            self.pass.update();
            if self.pass.schedule().finished() {
                break;
            }
            self.run_stage();
        }

        // Compositing reads the primary targets; it must finish before
        // other windows' work is interleaved.
        self.pass.unbind_active_fbo();
        if let Some(default_key) = self.default_window {
            self.set_active_window(default_key)?;
            let Self {
                gpu, pass, windows, ..
            } = self;
            if let Some(window) = windows.get_mut(default_key)
                && window.is_live()
            {
                let format = window.surface_format();
                let primary = window.primary;
                if let Some(view) = window.acquire(gpu) {
                    let view = view.clone();
                    pass.flatten_fbos(gpu, &view, format, primary);
                }
            }
        }

        if self.live_window_count() > 1 {
            self.gpu.flush();
        }

        // Present every live window; acquiring untouched ones here gives
        // them their per-frame clear.
        let keys: Vec<WindowKey> = self.windows.keys().collect();
        for key in keys {
            let Self { gpu, windows, .. } = self;
            if let Some(window) = windows.get_mut(key)
                && window.is_live()
            {
                window.acquire(gpu);
                window.present();
            }
        }

        if let Some(default_key) = self.default_window {
            self.set_active_window(default_key)?;
        }
        self.update_render_constants()?;
        self.pass.reset_render(&self.gpu);

        self.textures.next_frame();
        self.frame_index += 1;
        if self.frame_index % 60 == 0 {
            self.textures.prune(600);
        }
        Ok(())
    }

    /// Run the callbacks registered for the current (stage, ordinal) slot.
    fn run_stage(&mut self) {
        let batch = self.pass.stage_batch();
        for callback in batch {
            let status = callback(self);
            if status != 0 {
                log::error!("Stage callback exited early due to error: {status}");
            }
        }
    }

    /// Recompute the projection and push the per-frame uniforms.
    ///
    /// The active pass must expose a main stage named `default` or
    /// `primary` declaring `screenMatrix` and `zoom` — these are
    /// load-bearing contract checks between the renderer and whichever
    /// shaders are active.
    pub fn update_render_constants(&mut self) -> Result<()> {
        if let Some(key) = self.active_window {
            self.window_size = self.get_window_size(key);
        }
        if !self.query_and_set(DEFAULT_PASS) && !self.query_and_set("primary") {
            log::error!("Main rendering stage must be named either 'default' or 'primary'");
            return Err(StrataError::NoSuchStage(DEFAULT_PASS.to_string()));
        }
        if !self.pass.query_attribute("screenMatrix") {
            return Err(self.missing_uniform("screenMatrix"));
        }
        if !self.pass.query_attribute("zoom") {
            return Err(self.missing_uniform("zoom"));
        }

        let camera_matrix = self.camera.matrix();
        let (width, height) = (self.window_size.x.max(1.0), self.window_size.y.max(1.0));
        self.projection_matrix = match self.projection {
            Projection::Orthogonal => Mat4::orthographic_rh(
                -width / 2.0,
                width / 2.0,
                -height / 2.0,
                height / 2.0,
                0.0,
                1000.0,
            ),
            Projection::Perspective => {
                let eye = (camera_matrix * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
                let target = (camera_matrix * Vec4::new(0.0, 0.0, 2.0, 1.0)).truncate();
                Mat4::perspective_rh(120.0_f32.to_radians(), width / height, 1.0, 1500.0)
                    * Mat4::look_at_rh(eye, target, Vec3::Y)
            }
        };
        self.stored_projection = self.projection_matrix * camera_matrix;

        self.pass
            .write_attribute("screenMatrix", self.stored_projection.into());
        self.pass.write_attribute("zoom", self.zoom.into());
        let eye = (camera_matrix * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
        self.pass.write_attribute("eye_position", eye.into());
        self.pass
            .write_attribute("lightDirection", self.light_direction.into());
        self.pass
            .write_attribute("lightColor", self.light_color.into());
        Ok(())
    }

    // ── Internals ──────────────────────────────────────────────────────────

    fn missing_uniform(&self, uniform: &'static str) -> StrataError {
        let stage = self
            .pass
            .schedule()
            .active_pass()
            .unwrap_or("<none>")
            .to_string();
        log::error!("Render stage '{stage}' must declare a uniform named '{uniform}'");
        StrataError::MissingUniform { stage, uniform }
    }

    /// Bind the draw target for a layered draw: primary window draws land
    /// in the numbered target (UI layer 2 additionally drops the camera
    /// from the projection), other windows draw straight to their surface.
    fn bind_layer(&mut self, layer: u32) -> Result<()> {
        let primary = self
            .active_window
            .and_then(|key| self.windows.get(key))
            .is_some_and(|w| w.primary);
        if primary {
            self.pass.bind_active_fbo(layer as i32)?;
            if layer == 2 {
                let projection = self.projection_matrix;
                self.pass.write_attribute("screenMatrix", projection.into());
            }
        } else {
            self.pass.bind_active_fbo(-1)?;
        }
        Ok(())
    }

    /// Undo the UI-layer projection override after a draw.
    fn restore_ui_projection(&mut self, layer: u32) {
        if layer == 2 {
            let stored = self.stored_projection;
            self.pass.write_attribute("screenMatrix", stored.into());
        }
    }

    /// Lazily create the active window's vertex array on the active stage.
    fn ensure_window_vao(&mut self) {
        let Some(key) = self.active_window else {
            return;
        };
        let Some(window) = self.windows.get(key) else {
            return;
        };
        match window.vao.clone() {
            None => {
                let name = format!("{}VAO", window.name);
                let name = self.pass.make_vao(&name);
                if let Some(window) = self.windows.get_mut(key) {
                    window.vao = Some(name);
                }
            }
            Some(name) => {
                if !self.pass.has_vao(&name) {
                    self.pass.make_vao(&name);
                }
            }
        }
    }

    fn active_window_vao(&self) -> Option<String> {
        self.active_window
            .and_then(|key| self.windows.get(key))
            .and_then(|window| window.vao.clone())
    }

    /// Resolve the attachments the bound target maps to, acquiring the
    /// window frame when the default framebuffer is bound. `None` skips
    /// the draw: the target is incomplete mid-resize, or no live window
    /// exists.
    fn immediate_surface(&mut self) -> Option<DrawSurface> {
        if let Some(target) = self.pass.bound_target() {
            if !target.is_complete(self.pass.expected_size()) {
                return None;
            }
            return Some(DrawSurface {
                view: target.color_view().clone(),
                depth: Some(target.depth_view().clone()),
                format: TARGET_COLOR_FORMAT,
            });
        }
        let key = self.active_window?;
        let Self { gpu, windows, .. } = self;
        let window = windows.get_mut(key)?;
        if !window.is_live() {
            return None;
        }
        let format = window.surface_format();
        let depth = window.depth_view().clone();
        let view = window.acquire(gpu)?.clone();
        Some(DrawSurface {
            view,
            depth: Some(depth),
            format,
        })
    }

    /// Drain every live mesh's instance batch in one instanced draw per
    /// mesh. Registered at (`PrimaryRender`, 0) by
    /// [`enable_stored_render`](Self::enable_stored_render).
    fn flush_stored_batches(&mut self) -> i32 {
        if self.pass.set_specific_stage(DEFAULT_PASS).is_err() {
            return 1;
        }
        if self.bind_layer(1).is_err() {
            return 1;
        }
        let Some(surface) = self.immediate_surface() else {
            return 0;
        };

        // Per-frame material table upload.
        if self.materials.take_dirty() {
            let Self {
                gpu,
                pass,
                materials,
                ..
            } = self;
            pass.write_buffer(gpu, "materialData", materials.as_bytes());
        }

        let texture_bindings: Vec<(MeshId, Option<(u64, wgpu::TextureView)>)> = self
            .meshes
            .iter()
            .map(|(id, mesh)| {
                let binding = match mesh.kind() {
                    MeshKind::Textured {
                        texture: Some(texture),
                    } => self
                        .textures
                        .get(texture)
                        .map(|t| (t.id(), t.view().clone())),
                    _ => None,
                };
                (id, binding)
            })
            .collect();

        let Self {
            gpu,
            pass,
            meshes,
            units,
            ..
        } = self;
        let Some(stage) = pass.active_stage_mut() else {
            return 1;
        };

        for (id, binding) in texture_bindings {
            let Some(mesh) = meshes.get_mut(id) else {
                continue;
            };
            let instance_count = mesh.calls().len() as u32;
            if instance_count == 0 {
                continue;
            }
            let instance_bytes: Vec<u8> = bytemuck::cast_slice(mesh.calls()).to_vec();
            stage.write_buffer(gpu, "instanceData", &instance_bytes);

            match binding {
                Some((tex_id, view)) => {
                    units.set(0, tex_id, view);
                    stage.write_attribute("tex", UniformValue::Sampler(0));
                    stage.write_attribute("textured", UniformValue::Int(1));
                }
                None => {
                    units.clear(0);
                    stage.write_attribute("textured", UniformValue::Int(0));
                }
            }

            let (buffer, vertex_count, mode) = mesh.ensure_gpu(gpu);
            let buffer = buffer.clone();
            stage.encode_draw_with_buffer(
                gpu,
                mode,
                surface.format,
                &surface.view,
                surface.depth.as_ref(),
                units,
                &buffer,
                0..vertex_count,
                0..instance_count,
            );
            mesh.reset();
        }
        0
    }

    /// Render every pending batch into the shadow map from the light's
    /// point of view. Registered at (`PreRender`, 0) when shadows are
    /// enabled; runs before the primary drain so the batches are intact.
    fn flush_shadow_batches(&mut self) -> i32 {
        if self.pass.set_specific_stage("shadow").is_err() {
            return 1;
        }
        let light_matrix = self.light_matrix;
        self.pass.write_attribute("lightMatrix", light_matrix.into());

        let expected = self.pass.expected_size();
        let Some(target) = self.pass.frame_buffer_named("shadowMap") else {
            return 1;
        };
        if !target.is_complete(expected) {
            return 0;
        }
        let view = target.color_view().clone();
        let depth = target.depth_view().clone();

        let Self {
            gpu,
            pass,
            meshes,
            units,
            ..
        } = self;
        let Some(stage) = pass.active_stage_mut() else {
            return 1;
        };
        for (_, mesh) in meshes.iter_mut() {
            if mesh.calls().is_empty() {
                continue;
            }
            let models: Vec<Mat4> = mesh.calls().iter().map(|call| call.model).collect();
            let (buffer, vertex_count, mode) = mesh.ensure_gpu(gpu);
            let buffer = buffer.clone();
            for model in models {
                stage.write_attribute("objectMatrix", model.into());
                stage.encode_draw_with_buffer(
                    gpu,
                    mode,
                    TARGET_COLOR_FORMAT,
                    &view,
                    Some(&depth),
                    units,
                    &buffer,
                    0..vertex_count,
                    0..1,
                );
            }
        }
        0
    }
}
