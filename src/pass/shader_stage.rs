//! Shader Stage
//!
//! A compiled GPU program plus the name-keyed tables that make it
//! data-driven: input attributes, uniform slots and auxiliary buffers are
//! all declared up front (inline for the built-in variants, from a
//! stage-description file otherwise) and addressed by name at runtime.
//!
//! # Uniform model
//!
//! Every declared uniform gets a byte-size tag and an offset into one
//! CPU-side uniform block, computed at initialization in declaration order.
//! [`ShaderStage::write_attribute`] dispatches on the recorded tag to the
//! matching typed write into that block; the tag is the wire format
//! between generic name-keyed writes and typed GPU uploads. The block is
//! flushed to a single uniform buffer before each draw or dispatch.
//!
//! Writing a name that was never declared is a silent no-op (the lookup
//! records an empty slot so repeated misses stay cheap); callers must
//! pre-declare every uniform they intend to use.
//!
//! # Vertex arrays
//!
//! A stage with the vertex bit set always owns a `"VAO"`/`"VBO"` pair
//! created at initialization. Additional vertex arrays sharing the same
//! buffer layout can be registered with [`ShaderStage::make_extra_vao`] —
//! windows use these to keep independent vertex state without duplicating
//! buffers.

use std::borrow::Cow;

use bitflags::bitflags;
use glam::{IVec2, Mat4, Vec2, Vec3, Vec4};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::errors::{Result, StrataError};
use crate::gpu::{GpuContext, next_resource_id};
use crate::mesh::DrawMode;
use crate::settings::{FillMode, PipelineOptions};
use crate::texture::TextureUnits;

use super::target::DEPTH_FORMAT;

bitflags! {
    /// Which programmable stages a [`ShaderStage`] contains.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct StageFlags: u32 {
        const VERTEX   = 1 << 0;
        const FRAGMENT = 1 << 1;
        const COMPUTE  = 1 << 2;
        const GEOMETRY = 1 << 3;
    }
}

/// Byte-size tag of a declared uniform; selects the typed write in
/// [`ShaderStage::write_attribute`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformTag {
    Mat4,
    Vec4,
    Vec3,
    Vec2,
    Float,
    Int,
    IVec2,
    /// A sampler binding, written as a texture-unit index rather than block
    /// bytes. Declared with the distinguished `unique` size token.
    Sampler,
}

impl UniformTag {
    /// Decode a description-file size token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "64" => Self::Mat4,
            "16" => Self::Vec4,
            "12" => Self::Vec3,
            "8" => Self::Vec2,
            "4" => Self::Float,
            "1" => Self::Int,
            "81" => Self::IVec2,
            "unique" => Self::Sampler,
            _ => return None,
        })
    }

    /// Size of the value inside the uniform block. Samplers occupy none.
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::Mat4 => 64,
            Self::Vec4 => 16,
            Self::Vec3 => 12,
            Self::Vec2 | Self::IVec2 => 8,
            Self::Float | Self::Int => 4,
            Self::Sampler => 0,
        }
    }

    /// WGSL alignment of the value inside the uniform block.
    #[must_use]
    pub const fn alignment(self) -> usize {
        match self {
            Self::Mat4 | Self::Vec4 | Self::Vec3 => 16,
            Self::Vec2 | Self::IVec2 => 8,
            Self::Float | Self::Int => 4,
            Self::Sampler => 1,
        }
    }
}

/// A typed value for [`ShaderStage::write_attribute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Mat4(Mat4),
    Vec4(Vec4),
    Vec3(Vec3),
    Vec2(Vec2),
    Float(f32),
    Int(i32),
    IVec2(IVec2),
    /// Texture-unit index for a sampler uniform.
    Sampler(u32),
}

impl From<Mat4> for UniformValue {
    fn from(v: Mat4) -> Self {
        Self::Mat4(v)
    }
}
impl From<Vec4> for UniformValue {
    fn from(v: Vec4) -> Self {
        Self::Vec4(v)
    }
}
impl From<Vec3> for UniformValue {
    fn from(v: Vec3) -> Self {
        Self::Vec3(v)
    }
}
impl From<Vec2> for UniformValue {
    fn from(v: Vec2) -> Self {
        Self::Vec2(v)
    }
}
impl From<f32> for UniformValue {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}
impl From<i32> for UniformValue {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}
impl From<IVec2> for UniformValue {
    fn from(v: IVec2) -> Self {
        Self::IVec2(v)
    }
}

/// Kind of a named stage buffer. Numeric ids match the description-file
/// `[typeId]` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Read-only (from the shader's point of view) storage buffer.
    Storage,
    /// Extra uniform buffer exposed to custom shaders.
    Uniform,
    /// Raw vertex data.
    Vertex,
    /// Index data.
    Index,
    /// A named vertex-array entry — bookkeeping only, owns no storage of
    /// its own (draws pull vertices from `"VBO"`).
    VertexArray,
}

impl BufferKind {
    /// Decode a description-file buffer type id.
    #[must_use]
    pub fn from_id(id: i64) -> Option<Self> {
        Some(match id {
            0 => Self::Storage,
            1 => Self::Uniform,
            2 => Self::Vertex,
            3 => Self::Index,
            _ => return None,
        })
    }

    fn usages(self) -> wgpu::BufferUsages {
        // COPY_SRC everywhere keeps the read-back path open for custom
        // buffers.
        let base = wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC;
        match self {
            Self::Storage => wgpu::BufferUsages::STORAGE | base,
            Self::Uniform => wgpu::BufferUsages::UNIFORM | base,
            Self::Vertex => wgpu::BufferUsages::VERTEX | base,
            Self::Index => wgpu::BufferUsages::INDEX | base,
            Self::VertexArray => wgpu::BufferUsages::empty(),
        }
    }
}

/// A declared vertex input attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAttribute {
    pub name: String,
    pub location: u32,
    /// Number of `f32` components.
    pub components: u32,
}

/// Where a declared uniform lives in the stage's uniform block.
#[derive(Debug, Clone, Copy, Default)]
struct UniformSlot {
    tag: Option<UniformTag>,
    offset: usize,
}

struct StageBuffer {
    kind: BufferKind,
    buffer: Option<wgpu::Buffer>,
    capacity: u64,
    /// Binding index within the storage bind group (kinds that bind).
    binding: u32,
    id: u64,
}

/// Sources and declarations a stage is built from.
pub struct StageSources<'a> {
    pub label: &'a str,
    pub vertex: Option<&'a str>,
    pub fragment: Option<&'a str>,
    pub compute: Option<&'a str>,
    pub inputs: Vec<InputAttribute>,
    /// Declaration order defines the uniform-block layout.
    pub uniforms: Vec<(&'a str, UniformTag)>,
    pub buffers: Vec<(&'a str, BufferKind)>,
}

/// Compute block offsets for a uniform declaration list.
///
/// Offsets follow WGSL alignment rules in declaration order; the total is
/// rounded up to 16 bytes. Samplers are skipped; they bind as textures,
/// not block bytes.
#[must_use]
pub(crate) fn compute_uniform_layout(decls: &[(&str, UniformTag)]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(decls.len());
    let mut cursor = 0usize;
    for &(_, tag) in decls {
        if tag == UniformTag::Sampler {
            offsets.push(0);
            continue;
        }
        let align = tag.alignment();
        cursor = cursor.div_ceil(align) * align;
        offsets.push(cursor);
        cursor += tag.byte_size();
    }
    (offsets, cursor.div_ceil(16) * 16)
}

/// A compiled shader program with name-keyed uniform and buffer tables.
pub struct ShaderStage {
    label: String,
    active: StageFlags,

    module: Option<wgpu::ShaderModule>,
    compute_pipeline: Option<wgpu::ComputePipeline>,
    /// Render pipelines are immutable per (topology, target format); the
    /// cache fills lazily as draws hit new combinations.
    pipelines: FxHashMap<(DrawMode, wgpu::TextureFormat), wgpu::RenderPipeline>,

    inputs: Vec<InputAttribute>,

    uniforms: FxHashMap<String, UniformSlot>,
    uniform_data: Vec<u8>,
    uniform_dirty: bool,
    uniform_buffer: Option<wgpu::Buffer>,
    /// Sampler uniforms, in declaration order, with their current unit.
    samplers: Vec<(String, u32)>,

    buffers: FxHashMap<String, StageBuffer>,
    bound_vertex_array: Option<String>,
    bound_buffer: Option<String>,

    block_layout: Option<wgpu::BindGroupLayout>,
    texture_layout: Option<wgpu::BindGroupLayout>,
    storage_layout: Option<wgpu::BindGroupLayout>,
    pipeline_layout: wgpu::PipelineLayout,

    block_bind_group: Option<wgpu::BindGroup>,
    texture_bind_group: Option<(SmallVec<[u64; 4]>, wgpu::BindGroup)>,
    storage_bind_group: Option<wgpu::BindGroup>,
    storage_dirty: bool,

    sampler: wgpu::Sampler,
    fallback_view: wgpu::TextureView,

    options: PipelineOptions,
}

impl ShaderStage {
    /// Build a stage from WGSL sources and declarations.
    ///
    /// WGSL validation errors are fatal: the error text is surfaced in
    /// [`StrataError::ShaderCompile`] and the surrounding render-pass
    /// construction aborts.
    pub fn new(gpu: &GpuContext, sources: &StageSources<'_>, options: PipelineOptions) -> Result<Self> {
        let mut active = StageFlags::default();
        if sources.vertex.is_some() {
            active |= StageFlags::VERTEX;
        }
        if sources.fragment.is_some() {
            active |= StageFlags::FRAGMENT;
        }
        if sources.compute.is_some() {
            active |= StageFlags::COMPUTE;
        }

        // Uniform block layout in declaration order.
        let (offsets, block_size) = compute_uniform_layout(&sources.uniforms);
        let mut uniforms = FxHashMap::default();
        let mut samplers = Vec::new();
        for (&(name, tag), &offset) in sources.uniforms.iter().zip(&offsets) {
            uniforms.insert(
                name.to_string(),
                UniformSlot {
                    tag: Some(tag),
                    offset,
                },
            );
            if tag == UniformTag::Sampler {
                samplers.push((name.to_string(), 0));
            }
        }

        let uniform_buffer = (block_size > 0).then(|| {
            gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(sources.label),
                size: block_size as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });

        // Named auxiliary buffers; binding indices in declaration order.
        let mut buffers: FxHashMap<String, StageBuffer> = FxHashMap::default();
        let mut storage_count = 0u32;
        for &(name, kind) in &sources.buffers {
            let binding = if matches!(kind, BufferKind::Storage | BufferKind::Uniform) {
                storage_count += 1;
                storage_count - 1
            } else {
                0
            };
            buffers.insert(
                name.to_string(),
                StageBuffer {
                    kind,
                    buffer: None,
                    capacity: 0,
                    binding,
                    id: 0,
                },
            );
        }

        // A vertex-capable stage always owns its VAO/VBO pair.
        if active.contains(StageFlags::VERTEX) {
            buffers.insert(
                "VAO".to_string(),
                StageBuffer {
                    kind: BufferKind::VertexArray,
                    buffer: None,
                    capacity: 0,
                    binding: 0,
                    id: 0,
                },
            );
            buffers.insert(
                "VBO".to_string(),
                StageBuffer {
                    kind: BufferKind::Vertex,
                    buffer: None,
                    capacity: 0,
                    binding: 0,
                    id: 0,
                },
            );
        }

        let visibility = if active.contains(StageFlags::COMPUTE) {
            wgpu::ShaderStages::COMPUTE
        } else {
            wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT
        };

        let block_layout = uniform_buffer.as_ref().map(|_| {
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Stage Uniform Layout"),
                    entries: &[wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    }],
                })
        });

        let texture_layout = (!samplers.is_empty()).then(|| {
            let mut entries = Vec::new();
            for (i, _) in samplers.iter().enumerate() {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: (i * 2) as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                });
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: (i * 2 + 1) as u32,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                });
            }
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Stage Texture Layout"),
                    entries: &entries,
                })
        });

        let storage_layout = (storage_count > 0).then(|| {
            let mut entries = Vec::new();
            let mut sorted: Vec<_> = buffers
                .values()
                .filter(|b| matches!(b.kind, BufferKind::Storage | BufferKind::Uniform))
                .collect();
            sorted.sort_by_key(|b| b.binding);
            for buf in sorted {
                entries.push(wgpu::BindGroupLayoutEntry {
                    binding: buf.binding,
                    visibility,
                    ty: wgpu::BindingType::Buffer {
                        ty: match buf.kind {
                            BufferKind::Uniform => wgpu::BufferBindingType::Uniform,
                            _ => wgpu::BufferBindingType::Storage { read_only: true },
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                });
            }
            gpu.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("Stage Storage Layout"),
                    entries: &entries,
                })
        });

        let group_layouts: Vec<Option<&wgpu::BindGroupLayout>> = [
            block_layout.as_ref(),
            texture_layout.as_ref(),
            storage_layout.as_ref(),
        ]
        .into_iter()
        .flatten()
        .map(Some)
        .collect();

        let pipeline_layout = gpu
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(sources.label),
                bind_group_layouts: &group_layouts,
                immediate_size: 0,
            });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Stage Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let fallback_view = Self::make_fallback_texture(gpu);

        let mut stage = Self {
            label: sources.label.to_string(),
            active,
            module: None,
            compute_pipeline: None,
            pipelines: FxHashMap::default(),
            inputs: {
                let mut inputs = sources.inputs.clone();
                inputs.sort_by_key(|i| i.location);
                inputs
            },
            uniforms,
            uniform_data: vec![0; block_size],
            uniform_dirty: block_size > 0,
            uniform_buffer,
            samplers,
            buffers,
            bound_vertex_array: None,
            bound_buffer: None,
            block_layout,
            texture_layout,
            storage_layout,
            pipeline_layout,
            block_bind_group: None,
            texture_bind_group: None,
            storage_bind_group: None,
            storage_dirty: true,
            sampler,
            fallback_view,
            options,
        };

        stage.compile(gpu, sources)?;
        Ok(stage)
    }

    /// Compile the WGSL sources into a module (render) or pipeline
    /// (compute), converting validation failures into
    /// [`StrataError::ShaderCompile`].
    fn compile(&mut self, gpu: &GpuContext, sources: &StageSources<'_>) -> Result<()> {
        if let Some(compute_src) = sources.compute {
            let module = self.create_module(gpu, compute_src)?;
            let error_scope = gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
            let pipeline = gpu
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&self.label),
                    layout: Some(&self.pipeline_layout),
                    module: &module,
                    entry_point: Some("cs_main"),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                });
            if let Some(err) = pollster::block_on(error_scope.pop()) {
                return Err(StrataError::ShaderCompile {
                    stage: self.label.clone(),
                    message: err.to_string(),
                });
            }
            self.compute_pipeline = Some(pipeline);
            return Ok(());
        }

        // Vertex and fragment live in one module; the builtin sources are
        // single strings, file-based stages are concatenated by the loader.
        let src = match (sources.vertex, sources.fragment) {
            (Some(v), Some(f)) if v != f => Cow::Owned(format!("{v}\n{f}")),
            (Some(v), _) => Cow::Borrowed(v),
            (None, Some(f)) => Cow::Borrowed(f),
            (None, None) => {
                return Err(StrataError::ShaderCompile {
                    stage: self.label.clone(),
                    message: "stage declares no shader sources".to_string(),
                });
            }
        };
        self.module = Some(self.create_module(gpu, &src)?);
        Ok(())
    }

    fn create_module(&self, gpu: &GpuContext, src: &str) -> Result<wgpu::ShaderModule> {
        let error_scope = gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&self.label),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(src)),
            });
        if let Some(err) = pollster::block_on(error_scope.pop()) {
            log::error!("Compile failed for stage '{}': {err}", self.label);
            return Err(StrataError::ShaderCompile {
                stage: self.label.clone(),
                message: err.to_string(),
            });
        }
        log::debug!("Shader compiled correctly: {}", self.label);
        Ok(module)
    }

    fn make_fallback_texture(gpu: &GpuContext) -> wgpu::TextureView {
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Fallback White"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        gpu.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &[255, 255, 255, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Whether this stage contains the given programmable stage.
    #[must_use]
    pub fn has_stage(&self, flags: StageFlags) -> bool {
        self.active.contains(flags)
    }

    /// Whether a uniform with this name was declared.
    #[must_use]
    pub fn query_attribute(&self, name: &str) -> bool {
        self.uniforms
            .get(name)
            .is_some_and(|slot| slot.tag.is_some())
    }

    /// Write a uniform by name.
    ///
    /// Dispatches on the declared tag; an undeclared name records an empty
    /// slot and returns without effect. A value whose type disagrees with
    /// the declaration is dropped with a warning; the declaration wins.
    pub fn write_attribute(&mut self, name: &str, value: UniformValue) {
        let slot = *self.uniforms.entry(name.to_string()).or_default();
        let Some(tag) = slot.tag else {
            return;
        };

        if tag == UniformTag::Sampler {
            let unit = match value {
                UniformValue::Sampler(unit) => Some(unit),
                UniformValue::Int(index) if index >= 0 => Some(index as u32),
                _ => None,
            };
            if let Some(unit) = unit
                && let Some(entry) = self.samplers.iter_mut().find(|(n, _)| n == name)
            {
                entry.1 = unit;
            }
            return;
        }

        let bytes: SmallVec<[u8; 64]> = match (tag, value) {
            (UniformTag::Mat4, UniformValue::Mat4(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::Vec4, UniformValue::Vec4(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::Vec3, UniformValue::Vec3(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::Vec2, UniformValue::Vec2(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::Float, UniformValue::Float(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::Int, UniformValue::Int(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            (UniformTag::IVec2, UniformValue::IVec2(v)) => {
                SmallVec::from_slice(bytemuck::bytes_of(&v))
            }
            _ => {
                log::warn!(
                    "uniform '{name}' on stage '{}' declared as {tag:?}, write ignored",
                    self.label
                );
                return;
            }
        };
        self.uniform_data[slot.offset..slot.offset + bytes.len()].copy_from_slice(&bytes);
        self.uniform_dirty = true;
    }

    // ── Buffer bookkeeping ─────────────────────────────────────────────────

    /// Bind a named buffer. Vertex-array entries set the stage's active
    /// vertex state; other kinds set the write/read cursor.
    pub fn bind_buffer(&mut self, name: &str) {
        match self.buffers.get(name).map(|b| b.kind) {
            Some(BufferKind::VertexArray) => self.bound_vertex_array = Some(name.to_string()),
            Some(_) => self.bound_buffer = Some(name.to_string()),
            None => log::warn!("stage '{}' has no buffer '{name}'", self.label),
        }
    }

    /// Unbind a named buffer if it is currently bound.
    pub fn unbind_buffer(&mut self, name: &str) {
        if self.bound_vertex_array.as_deref() == Some(name) {
            self.bound_vertex_array = None;
        }
        if self.bound_buffer.as_deref() == Some(name) {
            self.bound_buffer = None;
        }
    }

    /// Upload bytes into a named buffer, growing it as needed.
    pub fn write_buffer(&mut self, gpu: &GpuContext, name: &str, data: &[u8]) {
        if self.bound_buffer.as_deref() != Some(name) {
            log::debug!("writing buffer '{name}' without binding it first");
        }
        let Some(entry) = self.buffers.get_mut(name) else {
            log::warn!("stage '{}' has no buffer '{name}'", self.label);
            return;
        };
        if entry.kind == BufferKind::VertexArray {
            return;
        }
        let needed = data.len() as u64;
        if entry.buffer.is_none() || entry.capacity < needed {
            entry.buffer = Some(gpu.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(name),
                size: needed.next_power_of_two().max(256),
                usage: entry.kind.usages(),
                mapped_at_creation: false,
            }));
            entry.capacity = needed.next_power_of_two().max(256);
            entry.id = next_resource_id();
            if matches!(entry.kind, BufferKind::Storage | BufferKind::Uniform) {
                self.storage_dirty = true;
            }
        }
        if let Some(buffer) = &entry.buffer {
            gpu.queue.write_buffer(buffer, 0, data);
        }
    }

    /// Upload one element of an array-structured buffer at `index`.
    pub fn write_sub_buffer_data(
        &mut self,
        gpu: &GpuContext,
        name: &str,
        index: u32,
        stride: u64,
        data: &[u8],
    ) {
        let Some(entry) = self.buffers.get(name) else {
            log::warn!("stage '{}' has no buffer '{name}'", self.label);
            return;
        };
        let offset = u64::from(index) * stride;
        match &entry.buffer {
            Some(buffer) if entry.capacity >= offset + data.len() as u64 => {
                gpu.queue.write_buffer(buffer, offset, data);
            }
            _ => log::warn!(
                "sub-buffer write past capacity of '{name}' on stage '{}'",
                self.label
            ),
        }
    }

    /// Read a named buffer's contents back to the CPU.
    ///
    /// Blocks on the GPU; meant for tooling and compute result retrieval,
    /// not the per-frame hot path.
    #[must_use]
    pub fn read_buffer(&self, gpu: &GpuContext, name: &str) -> Option<Vec<u8>> {
        let entry = self.buffers.get(name)?;
        let buffer = entry.buffer.as_ref()?;
        let size = entry.capacity;

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Buffer Readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, size);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = gpu.device.poll(wgpu::PollType::wait_indefinitely());
        match receiver.recv() {
            Ok(Ok(())) => {
                let data = slice.get_mapped_range().to_vec();
                staging.unmap();
                Some(data)
            }
            _ => {
                log::error!("read back of buffer '{name}' failed");
                None
            }
        }
    }

    /// Reassign the storage binding index of a named buffer.
    pub fn set_buffer_base(&mut self, name: &str, base: u32) {
        if let Some(entry) = self.buffers.get_mut(name) {
            entry.binding = base;
            self.storage_dirty = true;
        }
    }

    /// Register an additional vertex array sharing this stage's vertex
    /// layout. Returns the name for caller-side caching.
    pub fn make_extra_vao(&mut self, name: &str) -> String {
        self.buffers.insert(
            name.to_string(),
            StageBuffer {
                kind: BufferKind::VertexArray,
                buffer: None,
                capacity: 0,
                binding: 0,
                id: 0,
            },
        );
        name.to_string()
    }

    /// Whether a vertex array with this name exists.
    #[must_use]
    pub fn has_vao(&self, name: &str) -> bool {
        self.buffers
            .get(name)
            .is_some_and(|b| b.kind == BufferKind::VertexArray)
    }

    // ── Encoding ───────────────────────────────────────────────────────────

    /// Dispatch compute work. A no-op unless the compute bit is set.
    pub fn dispatch(&mut self, gpu: &GpuContext, x: u32, y: u32, z: u32) {
        if !self.active.contains(StageFlags::COMPUTE) {
            return;
        }
        let Some(pipeline) = self.compute_pipeline.clone() else {
            return;
        };
        self.flush_uniforms(gpu);
        self.refresh_bind_groups(gpu, &TextureUnits::default());

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Compute Dispatch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&self.label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            self.set_bind_groups(|index, group| pass.set_bind_group(index, group, &[]));
            pass.dispatch_workgroups(x, y, z);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Encode one draw pulling vertices from the stage's own `"VBO"`.
    ///
    /// Requires a bound vertex array, mirroring core-profile GL where a
    /// draw without vertex-array state is invalid.
    pub fn encode_draw(
        &mut self,
        gpu: &GpuContext,
        mode: DrawMode,
        color_format: wgpu::TextureFormat,
        color: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        units: &TextureUnits,
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    ) {
        if self.bound_vertex_array.is_none() {
            log::warn!("draw on stage '{}' with no vertex array bound", self.label);
            return;
        }
        let vertex_buffer = self
            .buffers
            .get("VBO")
            .and_then(|entry| entry.buffer.clone());
        self.encode(
            gpu,
            mode,
            color_format,
            color,
            depth,
            units,
            vertex_buffer.as_ref(),
            vertices,
            instances,
        );
    }

    /// Encode one draw pulling vertices from an external buffer (a mesh's
    /// own GPU buffer).
    pub fn encode_draw_with_buffer(
        &mut self,
        gpu: &GpuContext,
        mode: DrawMode,
        color_format: wgpu::TextureFormat,
        color: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        units: &TextureUnits,
        buffer: &wgpu::Buffer,
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    ) {
        self.encode(
            gpu,
            mode,
            color_format,
            color,
            depth,
            units,
            Some(buffer),
            vertices,
            instances,
        );
    }

    /// Flushes the uniform block, refreshes stale bind groups, lazily
    /// builds the pipeline for (mode, target format) and records a single
    /// render pass that loads the existing attachment contents.
    fn encode(
        &mut self,
        gpu: &GpuContext,
        mode: DrawMode,
        color_format: wgpu::TextureFormat,
        color: &wgpu::TextureView,
        depth: Option<&wgpu::TextureView>,
        units: &TextureUnits,
        vertex_buffer: Option<&wgpu::Buffer>,
        vertices: std::ops::Range<u32>,
        instances: std::ops::Range<u32>,
    ) {
        if !self.active.contains(StageFlags::VERTEX) {
            return;
        }
        self.flush_uniforms(gpu);
        self.refresh_bind_groups(gpu, units);
        self.ensure_pipeline(gpu, mode, color_format, depth.is_some());

        let Some(pipeline) = self.pipelines.get(&(mode, color_format)) else {
            return;
        };

        let mut encoder = gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Stage Draw"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(&self.label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: color,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: depth.map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        }),
                    }
                }),
                ..Default::default()
            });
            pass.set_pipeline(pipeline);
            self.set_bind_groups(|index, group| pass.set_bind_group(index, group, &[]));
            if let Some(buffer) = vertex_buffer {
                pass.set_vertex_buffer(0, buffer.slice(..));
            }
            pass.draw(vertices, instances);
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));
    }

    /// Rebuild pipelines with new blend/fill options (clears the cache so
    /// subsequent draws recreate them lazily).
    pub fn set_options(&mut self, gpu: &GpuContext, options: PipelineOptions) {
        let mut options = options;
        if !gpu.supports_polygon_mode(options.fill.polygon_mode()) {
            log::warn!("fill mode {:?} unsupported on this adapter", options.fill);
            options.fill = FillMode::Fill;
        }
        if options != self.options {
            self.options = options;
            self.pipelines.clear();
        }
    }

    fn flush_uniforms(&mut self, gpu: &GpuContext) {
        if !self.uniform_dirty {
            return;
        }
        if let Some(buffer) = &self.uniform_buffer {
            gpu.queue.write_buffer(buffer, 0, &self.uniform_data);
        }
        self.uniform_dirty = false;
    }

    fn refresh_bind_groups(&mut self, gpu: &GpuContext, units: &TextureUnits) {
        if self.block_bind_group.is_none()
            && let (Some(layout), Some(buffer)) = (&self.block_layout, &self.uniform_buffer)
        {
            self.block_bind_group = Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Stage Uniform BindGroup"),
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: buffer.as_entire_binding(),
                }],
            }));
        }

        if let Some(layout) = &self.texture_layout {
            let key: SmallVec<[u64; 4]> = self
                .samplers
                .iter()
                .map(|&(_, unit)| units.id_of(unit))
                .collect();
            let stale = self
                .texture_bind_group
                .as_ref()
                .is_none_or(|(cached, _)| *cached != key);
            if stale {
                let views: Vec<wgpu::TextureView> = self
                    .samplers
                    .iter()
                    .map(|&(_, unit)| {
                        units
                            .view_of(unit)
                            .cloned()
                            .unwrap_or_else(|| self.fallback_view.clone())
                    })
                    .collect();
                let mut entries = Vec::new();
                for (i, view) in views.iter().enumerate() {
                    entries.push(wgpu::BindGroupEntry {
                        binding: (i * 2) as u32,
                        resource: wgpu::BindingResource::TextureView(view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: (i * 2 + 1) as u32,
                        resource: wgpu::BindingResource::Sampler(&self.sampler),
                    });
                }
                let group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Stage Texture BindGroup"),
                    layout,
                    entries: &entries,
                });
                self.texture_bind_group = Some((key, group));
            }
        }

        if self.storage_dirty
            && let Some(layout) = &self.storage_layout
        {
            let mut bound: Vec<&StageBuffer> = self
                .buffers
                .values()
                .filter(|b| {
                    matches!(b.kind, BufferKind::Storage | BufferKind::Uniform)
                        && b.buffer.is_some()
                })
                .collect();
            bound.sort_by_key(|b| b.binding);
            let complete = bound.len() as u32
                == self
                    .buffers
                    .values()
                    .filter(|b| matches!(b.kind, BufferKind::Storage | BufferKind::Uniform))
                    .count() as u32;
            if complete {
                let entries: Vec<wgpu::BindGroupEntry> = bound
                    .iter()
                    .filter_map(|b| {
                        b.buffer.as_ref().map(|buffer| wgpu::BindGroupEntry {
                            binding: b.binding,
                            resource: buffer.as_entire_binding(),
                        })
                    })
                    .collect();
                self.storage_bind_group =
                    Some(gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Stage Storage BindGroup"),
                        layout,
                        entries: &entries,
                    }));
                self.storage_dirty = false;
            }
        }
    }

    fn set_bind_groups<'a>(&'a self, mut set: impl FnMut(u32, &'a wgpu::BindGroup)) {
        let mut index = 0;
        if let Some(group) = &self.block_bind_group {
            set(index, group);
            index += 1;
        }
        if let Some((_, group)) = &self.texture_bind_group {
            set(index, group);
            index += 1;
        }
        if let Some(group) = &self.storage_bind_group {
            set(index, group);
        }
    }

    fn ensure_pipeline(
        &mut self,
        gpu: &GpuContext,
        mode: DrawMode,
        color_format: wgpu::TextureFormat,
        with_depth: bool,
    ) {
        if self.pipelines.contains_key(&(mode, color_format)) {
            return;
        }
        let Some(module) = &self.module else {
            return;
        };

        let stride: u64 = self.inputs.iter().map(|i| u64::from(i.components) * 4).sum();
        let mut offset = 0u64;
        let attributes: Vec<wgpu::VertexAttribute> = self
            .inputs
            .iter()
            .map(|input| {
                let attr = wgpu::VertexAttribute {
                    format: match input.components {
                        1 => wgpu::VertexFormat::Float32,
                        2 => wgpu::VertexFormat::Float32x2,
                        3 => wgpu::VertexFormat::Float32x3,
                        _ => wgpu::VertexFormat::Float32x4,
                    },
                    offset,
                    shader_location: input.location,
                };
                offset += u64::from(input.components) * 4;
                attr
            })
            .collect();

        let buffers = if attributes.is_empty() {
            Vec::new()
        } else {
            vec![wgpu::VertexBufferLayout {
                array_stride: stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &attributes,
            }]
        };

        let targets = [Some(wgpu::ColorTargetState {
            format: color_format,
            blend: self.options.blend.blend_state(),
            write_mask: wgpu::ColorWrites::ALL,
        })];
        let fragment = self
            .active
            .contains(StageFlags::FRAGMENT)
            .then(|| wgpu::FragmentState {
                module,
                entry_point: Some("fs_main"),
                targets: &targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            });

        let pipeline = gpu
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&self.label),
                layout: Some(&self.pipeline_layout),
                vertex: wgpu::VertexState {
                    module,
                    entry_point: Some("vs_main"),
                    buffers: &buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment,
                primitive: wgpu::PrimitiveState {
                    topology: mode.topology(),
                    polygon_mode: self.options.fill.polygon_mode(),
                    ..Default::default()
                },
                depth_stencil: with_depth.then(|| wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: Some(true),
                    depth_compare: Some(wgpu::CompareFunction::LessEqual),
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                multiview_mask: None,
                cache: None,
            });
        self.pipelines.insert((mode, color_format), pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_follows_declaration_order_with_alignment() {
        let decls = [
            ("objectMatrix", UniformTag::Mat4),
            ("screenMatrix", UniformTag::Mat4),
            ("globalColor", UniformTag::Vec4),
            ("eye_position", UniformTag::Vec3),
            ("zoom", UniformTag::Float),
            ("textured", UniformTag::Int),
            ("tex", UniformTag::Sampler),
        ];
        let (offsets, size) = compute_uniform_layout(&decls);
        assert_eq!(offsets[0], 0);
        assert_eq!(offsets[1], 64);
        assert_eq!(offsets[2], 128);
        assert_eq!(offsets[3], 144);
        // A scalar packs into the tail of the preceding vec3.
        assert_eq!(offsets[4], 156);
        assert_eq!(offsets[5], 160);
        assert_eq!(size % 16, 0);
        assert!(size >= 164);
    }

    #[test]
    fn sampler_occupies_no_block_bytes() {
        let decls = [("tex", UniformTag::Sampler), ("zoom", UniformTag::Float)];
        let (offsets, size) = compute_uniform_layout(&decls);
        assert_eq!(offsets[1], 0);
        assert_eq!(size, 16);
    }

    #[test]
    fn size_tokens_decode() {
        assert_eq!(UniformTag::from_token("64"), Some(UniformTag::Mat4));
        assert_eq!(UniformTag::from_token("unique"), Some(UniformTag::Sampler));
        assert_eq!(UniformTag::from_token("7"), None);
    }
}
