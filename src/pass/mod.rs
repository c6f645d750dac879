//! Render Pass
//!
//! A render pass owns a set of named [`ShaderStage`]s organized into the
//! six ordered render stages, the pool of framebuffer targets (three
//! primary, three secondary, and a name-keyed table of extras), and the
//! [`PassSchedule`] that drives stage advancement and callback execution.
//! At the end of a frame it composites ("flattens") the primary targets
//! into the presented frame.
//!
//! Passes are fully replaceable at runtime; the renderer invalidates every
//! window's cached vertex-array name when swapping one in.

pub mod builtin;
pub mod description;
pub mod schedule;
pub mod shader_stage;
pub mod stage;
pub mod target;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::errors::{Result, StrataError};
use crate::gpu::GpuContext;
use crate::mesh::DrawMode;
use crate::settings::PipelineOptions;
use crate::texture::TextureUnits;

use self::builtin::BuiltinStage;
use self::description::{PassDescription, parse_pass_description, parse_stage_description};
use self::schedule::{PassSchedule, RenderCallback};
use self::shader_stage::{BufferKind, ShaderStage, StageSources, UniformTag, UniformValue};
use self::stage::RenderStage;
use self::target::RenderTarget;

/// Name of the always-present main shader pass.
pub const DEFAULT_PASS: &str = "default";

/// An extra framebuffer target declared by a pass description or created
/// at runtime.
struct ExtraTarget {
    stage: RenderStage,
    id: i32,
    target: RenderTarget,
}

/// Which target draws currently land in.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BoundTarget {
    /// The active window's own framebuffer.
    #[default]
    Default,
    Primary(usize),
    Secondary(usize),
    Extra(String),
}

/// Vertex format of the compositing quad.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FlattenVertex {
    pos: [f32; 2],
    uv: [f32; 2],
}

/// Full-screen quad in strip order; v = 0 is the top texture row.
const FLATTEN_QUAD: [FlattenVertex; 4] = [
    FlattenVertex { pos: [-1.0, -1.0], uv: [0.0, 1.0] },
    FlattenVertex { pos: [-1.0, 1.0], uv: [0.0, 0.0] },
    FlattenVertex { pos: [1.0, -1.0], uv: [1.0, 1.0] },
    FlattenVertex { pos: [1.0, 1.0], uv: [1.0, 0.0] },
];

/// Ids 0–5 address the fixed primary/secondary slots; extras start here.
const FIRST_EXTRA_ID: i32 = 6;

pub struct RenderPass {
    schedule: PassSchedule,
    stages: FxHashMap<String, ShaderStage>,
    flatten: ShaderStage,

    primary: [RenderTarget; 3],
    secondary: [RenderTarget; 3],
    extras: BTreeMap<String, ExtraTarget>,
    next_extra_id: i32,

    bound: BoundTarget,
    /// Dimensions targets are expected to match; lags behind the window
    /// between a resize event and [`resize_fbos`](Self::resize_fbos).
    expected_size: (u32, u32),
    options: PipelineOptions,
}

impl RenderPass {
    /// The built-in immediate-mode pass: one default render stage at
    /// `PrimaryRender` ordinal 0.
    pub fn new(gpu: &GpuContext, size: (u32, u32), options: PipelineOptions) -> Result<Self> {
        let mut pass = Self::empty(gpu, size, options)?;
        let default = ShaderStage::new(gpu, &BuiltinStage::DefaultRender.sources(), options)?;
        pass.insert_stage(DEFAULT_PASS, RenderStage::PrimaryRender, 0, default);
        Ok(pass)
    }

    /// The built-in stored (instanced) pass, optionally with a shadow
    /// stage ahead of the main render.
    pub fn stored(
        gpu: &GpuContext,
        size: (u32, u32),
        options: PipelineOptions,
        with_shadow: bool,
    ) -> Result<Self> {
        let mut pass = Self::empty(gpu, size, options)?;
        let stored = ShaderStage::new(gpu, &BuiltinStage::StoredRender.sources(), options)?;
        pass.insert_stage(DEFAULT_PASS, RenderStage::PrimaryRender, 0, stored);
        if with_shadow {
            let shadow = ShaderStage::new(gpu, &BuiltinStage::Shadow.sources(), options)?;
            pass.insert_stage("shadow", RenderStage::PreRender, 0, shadow);
            pass.make_fbo_for_stage(gpu, "shadowMap", RenderStage::PreRender);
        }
        Ok(pass)
    }

    /// Build a pass from a render-pass description file.
    ///
    /// Stage-description paths inside the file resolve relative to the
    /// description's directory; each stage entry `path[stage]=ordinal`
    /// loads `path.meta`. Any shader that fails to compile aborts
    /// construction.
    pub fn from_file(
        gpu: &GpuContext,
        path: &Path,
        size: (u32, u32),
        options: PipelineOptions,
    ) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let label = path.display().to_string();
        let description = parse_pass_description(&label, &text)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));

        let mut pass = Self::empty(gpu, size, options)?;
        pass.load_description(gpu, dir, &description)?;

        if !pass.schedule.contiguous_ordinals() {
            log::warn!(
                "{label}: stage ordinals are not contiguous from 0; \
                 passes above a gap will never run"
            );
        }
        Ok(pass)
    }

    fn empty(gpu: &GpuContext, size: (u32, u32), options: PipelineOptions) -> Result<Self> {
        let flatten = ShaderStage::new(gpu, &BuiltinStage::Flatten.sources(), options)?;
        let primary =
            std::array::from_fn(|i| RenderTarget::new(gpu, &format!("Primary {i}"), size.0, size.1));
        let secondary = std::array::from_fn(|i| {
            RenderTarget::new(gpu, &format!("Secondary {i}"), size.0, size.1)
        });
        Ok(Self {
            schedule: PassSchedule::new(),
            stages: FxHashMap::default(),
            flatten,
            primary,
            secondary,
            extras: BTreeMap::new(),
            next_extra_id: FIRST_EXTRA_ID,
            bound: BoundTarget::Default,
            expected_size: size,
            options,
        })
    }

    fn insert_stage(
        &mut self,
        name: &str,
        stage: RenderStage,
        ordinal: u32,
        shader: ShaderStage,
    ) {
        self.schedule.register_pass(name, stage, ordinal);
        self.stages.insert(name.to_string(), shader);
    }

    fn load_description(
        &mut self,
        gpu: &GpuContext,
        dir: &Path,
        description: &PassDescription,
    ) -> Result<()> {
        let shared_buffers: Vec<(String, BufferKind)> = description
            .buffers
            .iter()
            .map(|b| (b.name.clone(), b.kind))
            .collect();

        for entry in &description.stages {
            let meta_path = dir.join(format!("{}.meta", entry.path));
            let shader = load_stage_file(gpu, dir, &meta_path, &shared_buffers, self.options)?;
            self.insert_stage(&entry.name, entry.stage, entry.ordinal, shader);
        }

        for fbo in &description.fbos {
            let id = self.next_extra_id;
            self.next_extra_id += 1;
            self.extras.insert(
                fbo.name.clone(),
                ExtraTarget {
                    stage: fbo.stage,
                    id,
                    target: RenderTarget::new(
                        gpu,
                        &fbo.name,
                        self.expected_size.0,
                        self.expected_size.1,
                    ),
                },
            );
        }
        Ok(())
    }

    // ── Schedule delegation ────────────────────────────────────────────────

    /// Advance the stage machine (see [`PassSchedule::update`]).
    pub fn update(&mut self) {
        self.schedule.update();
    }

    #[must_use]
    pub fn current_stage(&self) -> RenderStage {
        self.schedule.current_stage()
    }

    /// Callbacks to run for the current (stage, ordinal) slot.
    #[must_use]
    pub fn stage_batch(&self) -> smallvec::SmallVec<[RenderCallback; 8]> {
        self.schedule.stage_batch()
    }

    pub fn register_callback(&mut self, stage: RenderStage, id: i32, callback: RenderCallback) {
        self.schedule.register_callback(stage, id, callback);
    }

    /// Activate a pass by name.
    pub fn set_specific_stage(&mut self, name: &str) -> Result<()> {
        if self.schedule.set_specific(name) {
            Ok(())
        } else {
            Err(StrataError::NoSuchStage(name.to_string()))
        }
    }

    #[must_use]
    pub fn query_stage(&self, name: &str) -> bool {
        self.schedule.query_pass(name)
    }

    /// Rewind the schedule and clear every target for the next frame.
    ///
    /// Clearing stops at the first incomplete target — the pass is mid-
    /// resize and the stale contents will be thrown away anyway.
    pub fn reset_render(&mut self, gpu: &GpuContext) {
        self.schedule.reset();
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Pass Reset"),
            });
        for target in self
            .primary
            .iter()
            .chain(self.secondary.iter())
            .chain(self.extras.values().map(|e| &e.target))
        {
            if !target.is_complete(self.expected_size) {
                break;
            }
            target.clear(&mut encoder);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    // ── Active-stage operations ────────────────────────────────────────────

    /// The shader stage the schedule currently points at.
    pub fn active_stage_mut(&mut self) -> Option<&mut ShaderStage> {
        let name = self.schedule.active_pass()?.to_string();
        self.stages.get_mut(&name)
    }

    /// Whether the active stage declares a uniform with this name.
    #[must_use]
    pub fn query_attribute(&self, name: &str) -> bool {
        self.schedule
            .active_pass()
            .and_then(|pass| self.stages.get(pass))
            .is_some_and(|stage| stage.query_attribute(name))
    }

    /// Write a uniform on the active stage (silent no-op for undeclared
    /// names).
    pub fn write_attribute(&mut self, name: &str, value: UniformValue) {
        if let Some(stage) = self.active_stage_mut() {
            stage.write_attribute(name, value);
        }
    }

    pub fn bind_buffer(&mut self, name: &str) {
        if let Some(stage) = self.active_stage_mut() {
            stage.bind_buffer(name);
        }
    }

    pub fn unbind_buffer(&mut self, name: &str) {
        if let Some(stage) = self.active_stage_mut() {
            stage.unbind_buffer(name);
        }
    }

    pub fn write_buffer(&mut self, gpu: &GpuContext, name: &str, data: &[u8]) {
        if let Some(stage) = self.active_stage_mut() {
            stage.write_buffer(gpu, name, data);
        }
    }

    pub fn write_sub_buffer_data(
        &mut self,
        gpu: &GpuContext,
        name: &str,
        index: u32,
        stride: u64,
        data: &[u8],
    ) {
        if let Some(stage) = self.active_stage_mut() {
            stage.write_sub_buffer_data(gpu, name, index, stride, data);
        }
    }

    pub fn set_buffer_base(&mut self, name: &str, base: u32) {
        if let Some(stage) = self.active_stage_mut() {
            stage.set_buffer_base(name, base);
        }
    }

    /// Read a named buffer on the active stage back to the CPU.
    #[must_use]
    pub fn read_buffer(&self, gpu: &GpuContext, name: &str) -> Option<Vec<u8>> {
        self.schedule
            .active_pass()
            .and_then(|pass| self.stages.get(pass))
            .and_then(|stage| stage.read_buffer(gpu, name))
    }

    /// Register an extra vertex array on the active stage.
    pub fn make_vao(&mut self, name: &str) -> String {
        self.active_stage_mut()
            .map_or_else(|| name.to_string(), |stage| stage.make_extra_vao(name))
    }

    #[must_use]
    pub fn has_vao(&self, name: &str) -> bool {
        self.schedule
            .active_pass()
            .and_then(|pass| self.stages.get(pass))
            .is_some_and(|stage| stage.has_vao(name))
    }

    /// Dispatch compute work on the active stage; a no-op unless its
    /// compute bit is set.
    pub fn dispatch_compute(&mut self, gpu: &GpuContext, x: u32, y: u32, z: u32) {
        if let Some(stage) = self.active_stage_mut() {
            stage.dispatch(gpu, x, y, z);
        }
    }

    // ── Target addressing ──────────────────────────────────────────────────

    /// Bind the target draws land in. `-1` binds the window framebuffer;
    /// 0–2 the primary targets, 3–5 the secondary targets, anything above
    /// searches the extras registered for the active stage.
    pub fn bind_active_fbo(&mut self, id: i32) -> Result<()> {
        self.bound = match id {
            -1 => BoundTarget::Default,
            0..=2 => BoundTarget::Primary(id as usize),
            3..=5 => BoundTarget::Secondary(id as usize - 3),
            _ => {
                let stage = self.schedule.current_stage();
                let name = self
                    .extras
                    .iter()
                    .find(|(_, extra)| extra.stage == stage && extra.id == id)
                    .map(|(name, _)| name.clone())
                    .ok_or_else(|| {
                        log::error!("Attempted to bind non existent FBO {id}");
                        StrataError::NoSuchFrameBuffer(id)
                    })?;
                BoundTarget::Extra(name)
            }
        };
        Ok(())
    }

    /// Rebind the window framebuffer.
    pub fn unbind_active_fbo(&mut self) {
        self.bound = BoundTarget::Default;
    }

    #[must_use]
    pub fn bound(&self) -> &BoundTarget {
        &self.bound
    }

    /// Resolve the bound target; `None` means the window framebuffer.
    #[must_use]
    pub fn bound_target(&self) -> Option<&RenderTarget> {
        match &self.bound {
            BoundTarget::Default => None,
            BoundTarget::Primary(i) => Some(&self.primary[*i]),
            BoundTarget::Secondary(i) => Some(&self.secondary[*i]),
            BoundTarget::Extra(name) => self.extras.get(name).map(|e| &e.target),
        }
    }

    /// Look a target up by slot id (0–2 primary, 3–5 secondary, ≥6 extras
    /// of the active stage).
    #[must_use]
    pub fn frame_buffer(&self, id: i32) -> Option<&RenderTarget> {
        match id {
            0..=2 => Some(&self.primary[id as usize]),
            3..=5 => Some(&self.secondary[id as usize - 3]),
            _ => {
                let stage = self.schedule.current_stage();
                self.extras
                    .values()
                    .find(|extra| extra.stage == stage && extra.id == id)
                    .map(|extra| &extra.target)
            }
        }
    }

    /// Look an extra target up by name.
    #[must_use]
    pub fn frame_buffer_named(&self, name: &str) -> Option<&RenderTarget> {
        self.extras.get(name).map(|e| &e.target)
    }

    /// Create an extra target at runtime, returning its slot id.
    pub fn make_fbo(&mut self, gpu: &GpuContext, name: &str) -> i32 {
        self.make_fbo_for_stage(gpu, name, RenderStage::PrimaryRender)
    }

    /// Create an extra target answering to a specific stage's ids.
    pub fn make_fbo_for_stage(
        &mut self,
        gpu: &GpuContext,
        name: &str,
        stage: RenderStage,
    ) -> i32 {
        let id = self.next_extra_id;
        self.next_extra_id += 1;
        self.extras.insert(
            name.to_string(),
            ExtraTarget {
                stage,
                id,
                target: RenderTarget::new(gpu, name, self.expected_size.0, self.expected_size.1),
            },
        );
        id
    }

    /// Dimensions the targets are expected to match.
    #[must_use]
    pub fn expected_size(&self) -> (u32, u32) {
        self.expected_size
    }

    /// Record the window's new size without re-allocating; draws will skip
    /// until [`resize_fbos`](Self::resize_fbos) runs.
    pub fn note_window_size(&mut self, size: (u32, u32)) {
        self.expected_size = size;
    }

    /// Re-allocate every target at the new dimensions.
    pub fn resize_fbos(&mut self, gpu: &GpuContext, size: (u32, u32)) {
        self.expected_size = size;
        for target in self.primary.iter_mut().chain(self.secondary.iter_mut()) {
            target.resize(gpu, size.0, size.1);
        }
        for extra in self.extras.values_mut() {
            extra.target.resize(gpu, size.0, size.1);
        }
    }

    /// Re-allocate one extra target by name.
    pub fn resize_specific_fbo(&mut self, gpu: &GpuContext, name: &str, size: (u32, u32)) {
        if let Some(extra) = self.extras.get_mut(name) {
            extra.target.resize(gpu, size.0, size.1);
        }
    }

    // ── Compositing ────────────────────────────────────────────────────────

    /// Composite the three primary targets onto the presented frame.
    ///
    /// Runs only for the primary window. Targets are layered in fixed
    /// slot order — 0 background, 1 content, 2 UI overlay — with the
    /// alpha-discard compositor.
    pub fn flatten_fbos(
        &mut self,
        gpu: &GpuContext,
        frame_view: &wgpu::TextureView,
        frame_format: wgpu::TextureFormat,
        is_primary_window: bool,
    ) {
        if !is_primary_window {
            return;
        }
        let Self {
            flatten, primary, ..
        } = self;

        flatten.write_attribute("FBO", UniformValue::Sampler(1));
        flatten.bind_buffer("VAO");
        flatten.bind_buffer("VBO");
        flatten.write_buffer(gpu, "VBO", bytemuck::cast_slice(&FLATTEN_QUAD));

        let mut units = TextureUnits::default();
        for target in primary.iter() {
            units.set(1, target.id(), target.color_view().clone());
            flatten.encode_draw(
                gpu,
                DrawMode::TriangleStrip,
                frame_format,
                frame_view,
                None,
                &units,
                0..4,
                0..1,
            );
        }

        flatten.unbind_buffer("VBO");
        flatten.unbind_buffer("VAO");
    }

    /// Re-apply pipeline options to every stage (clears pipeline caches).
    pub fn set_options(&mut self, gpu: &GpuContext, options: PipelineOptions) {
        self.options = options;
        for stage in self.stages.values_mut() {
            stage.set_options(gpu, options);
        }
        self.flatten.set_options(gpu, options);
    }

    /// Direct access to the schedule for the frame driver.
    #[must_use]
    pub fn schedule(&self) -> &PassSchedule {
        &self.schedule
    }
}

/// Load a shader stage from a `.meta` description file.
fn load_stage_file(
    gpu: &GpuContext,
    dir: &Path,
    meta_path: &Path,
    shared_buffers: &[(String, BufferKind)],
    options: PipelineOptions,
) -> Result<ShaderStage> {
    let label = meta_path.display().to_string();
    let text = fs::read_to_string(meta_path)?;
    let description = parse_stage_description(&label, &text)?;

    let vertex_src = description
        .vertex
        .as_ref()
        .map(|p| fs::read_to_string(dir.join(p)))
        .transpose()?;
    // Vertex and fragment often share one WGSL file; load it once.
    let fragment_src = match (&description.fragment, &description.vertex) {
        (Some(f), Some(v)) if f == v => None,
        (Some(f), _) => Some(fs::read_to_string(dir.join(f))?),
        (None, _) => None,
    };
    let compute_src = description
        .compute
        .as_ref()
        .map(|p| fs::read_to_string(dir.join(p)))
        .transpose()?;

    let uniforms: Vec<(&str, UniformTag)> = description
        .uniforms
        .iter()
        .map(|(name, tag)| (name.as_str(), *tag))
        .collect();

    let mut buffers: Vec<(&str, BufferKind)> = description
        .buffers
        .iter()
        .map(|(name, kind)| (name.as_str(), *kind))
        .collect();
    for (name, kind) in shared_buffers {
        if !buffers.iter().any(|(n, _)| *n == name.as_str()) {
            buffers.push((name.as_str(), *kind));
        }
    }

    let sources = StageSources {
        label: &label,
        vertex: vertex_src.as_deref(),
        // A fragment entry naming the vertex file compiles from the same
        // loaded source.
        fragment: if description.fragment.is_some() {
            fragment_src.as_deref().or(vertex_src.as_deref())
        } else {
            None
        },
        compute: compute_src.as_deref(),
        inputs: description.inputs.clone(),
        uniforms,
        buffers,
    };
    ShaderStage::new(gpu, &sources, options)
}
