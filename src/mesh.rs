//! Meshes
//!
//! GPU-buffer-backed geometry with per-instance render-call batching. A
//! mesh is a CPU vertex list plus a lazily built GPU buffer; in stored
//! (deferred) rendering mode it also carries the list of
//! [`RenderInformation`] records accumulated by `add_call` and drained once
//! per frame — the separation between "describe N draws" and "execute N
//! draws in one GPU call".
//!
//! Mesh *file parsing* is out of scope; hosts construct meshes from
//! vertices they decoded themselves.

use glam::{Vec2, Vec3, Vec4};
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use crate::gpu::GpuContext;
use crate::renderer::stored::RenderInformation;
use crate::texture::TextureId;

slotmap::new_key_type! {
    /// Handle to a mesh in the [`MeshRegistry`].
    pub struct MeshId;
}

/// One vertex of a mesh: position, color, normal, texture coordinates.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub pos: Vec4,
    pub color: Vec4,
    pub normal: Vec3,
    pub uv: Vec2,
}

impl Vertex {
    /// Number of `f32` components per vertex — must agree with the vertex
    /// layouts declared by shader stages.
    pub const COMPONENTS: u32 = 13;

    #[must_use]
    pub fn new(pos: Vec4, color: Vec4, uv: Vec2) -> Self {
        Self {
            pos,
            color,
            normal: Vec3::Z,
            uv,
        }
    }
}

/// Primitive topology of a mesh, with GL-style numeric ids as used by the
/// public API and data files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    /// The 2D default. Fans are not a native topology on modern APIs and
    /// are expanded to a triangle list when the GPU buffer is built.
    #[default]
    TriangleFan,
}

impl DrawMode {
    /// Decode a public-API primitive id (GL numbering).
    #[must_use]
    pub fn from_id(id: i32) -> Self {
        match id {
            0 => Self::Points,
            1 => Self::Lines,
            2 => Self::LineLoop,
            3 => Self::LineStrip,
            5 => Self::TriangleStrip,
            4 => Self::Triangles,
            _ => Self::TriangleFan,
        }
    }

    /// The wgpu topology draws with this mode use. Fans and loops report
    /// the topology of their expanded form.
    #[must_use]
    pub fn topology(self) -> wgpu::PrimitiveTopology {
        match self {
            Self::Points => wgpu::PrimitiveTopology::PointList,
            Self::Lines => wgpu::PrimitiveTopology::LineList,
            Self::LineLoop | Self::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            Self::Triangles | Self::TriangleFan => wgpu::PrimitiveTopology::TriangleList,
            Self::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

/// Expand vertices for upload and return the effective draw mode.
///
/// - Triangle fans become a triangle list (`0, i, i+1`).
/// - Line loops close themselves by repeating the first vertex.
/// - Triangle lists get per-face (unsmoothed) normals.
#[must_use]
pub fn prepare_vertices(vertices: &[Vertex], mode: DrawMode) -> (Vec<Vertex>, DrawMode) {
    match mode {
        DrawMode::TriangleFan if vertices.len() >= 3 => {
            let mut out = Vec::with_capacity((vertices.len() - 2) * 3);
            for i in 1..vertices.len() - 1 {
                out.push(vertices[0]);
                out.push(vertices[i]);
                out.push(vertices[i + 1]);
            }
            (out, DrawMode::Triangles)
        }
        DrawMode::LineLoop if vertices.len() >= 2 => {
            let mut out = vertices.to_vec();
            out.push(vertices[0]);
            (out, DrawMode::LineStrip)
        }
        DrawMode::Triangles => {
            let mut out = vertices.to_vec();
            for tri in out.chunks_exact_mut(3) {
                let a = tri[0].pos.truncate();
                let normal = (tri[1].pos.truncate() - a)
                    .cross(tri[2].pos.truncate() - a)
                    .normalize_or(Vec3::Z);
                for v in tri {
                    v.normal = normal;
                }
            }
            (out, DrawMode::Triangles)
        }
        _ => (vertices.to_vec(), mode),
    }
}

/// Whether a mesh samples a texture when drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MeshKind {
    #[default]
    Plain,
    Textured {
        texture: Option<TextureId>,
    },
}

struct MeshGpu {
    buffer: wgpu::Buffer,
    vertex_count: u32,
    mode: DrawMode,
}

/// Geometry plus its per-frame instance batch.
pub struct Mesh {
    pub name: String,
    vertices: Vec<Vertex>,
    draw_mode: DrawMode,
    color: Vec4,
    kind: MeshKind,
    gpu: Option<MeshGpu>,
    calls: Vec<RenderInformation>,
}

impl Mesh {
    #[must_use]
    pub fn new(draw_mode: DrawMode) -> Self {
        Self {
            name: "Mesh".to_string(),
            vertices: Vec::new(),
            draw_mode,
            color: Vec4::ONE,
            kind: MeshKind::Plain,
            gpu: None,
            calls: Vec::new(),
        }
    }

    /// A mesh that binds `texture` before drawing.
    #[must_use]
    pub fn textured(draw_mode: DrawMode, texture: Option<TextureId>) -> Self {
        Self {
            kind: MeshKind::Textured { texture },
            ..Self::new(draw_mode)
        }
    }

    #[must_use]
    pub fn from_vertices(draw_mode: DrawMode, vertices: Vec<Vertex>) -> Self {
        Self {
            vertices,
            ..Self::new(draw_mode)
        }
    }

    pub fn add_vertex(&mut self, vertex: Vertex) {
        self.vertices.push(vertex);
        self.gpu = None;
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[must_use]
    pub fn draw_mode(&self) -> DrawMode {
        self.draw_mode
    }

    #[must_use]
    pub fn color(&self) -> Vec4 {
        self.color
    }

    pub fn set_color(&mut self, color: Vec4) {
        self.color = color;
    }

    #[must_use]
    pub fn kind(&self) -> MeshKind {
        self.kind
    }

    pub fn set_texture(&mut self, texture: Option<TextureId>) {
        self.kind = MeshKind::Textured { texture };
    }

    // ── Stored-render batching ─────────────────────────────────────────────

    /// Append one instance record. No GPU state is touched.
    pub fn add_call(&mut self, info: RenderInformation) {
        self.calls.push(info);
    }

    /// The batch accumulated since the last [`reset`](Self::reset).
    #[must_use]
    pub fn calls(&self) -> &[RenderInformation] {
        &self.calls
    }

    /// Clear the instance batch for the next frame.
    pub fn reset(&mut self) {
        self.calls.clear();
    }

    // ── GPU buffer ─────────────────────────────────────────────────────────

    /// Build the GPU vertex buffer if it is missing, returning the buffer,
    /// the upload vertex count and the effective draw mode.
    pub fn ensure_gpu(&mut self, gpu: &GpuContext) -> (&wgpu::Buffer, u32, DrawMode) {
        let gpu_mesh = self.gpu.get_or_insert_with(|| {
            let (expanded, mode) = prepare_vertices(&self.vertices, self.draw_mode);
            let buffer = gpu
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&self.name),
                    contents: bytemuck::cast_slice(&expanded),
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                });
            MeshGpu {
                buffer,
                vertex_count: expanded.len() as u32,
                mode,
            }
        });
        (&gpu_mesh.buffer, gpu_mesh.vertex_count, gpu_mesh.mode)
    }
}

/// The renderer-owned mesh registry.
///
/// Replaces a process-wide mesh library: meshes are registered once,
/// addressed by [`MeshId`], and walked each frame by the stored-render
/// drain callback.
#[derive(Default)]
pub struct MeshRegistry {
    meshes: SlotMap<MeshId, Mesh>,
}

impl MeshRegistry {
    pub fn insert(&mut self, mesh: Mesh) -> MeshId {
        self.meshes.insert(mesh)
    }

    #[must_use]
    pub fn get(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id)
    }

    pub fn get_mut(&mut self, id: MeshId) -> Option<&mut Mesh> {
        self.meshes.get_mut(id)
    }

    pub fn remove(&mut self, id: MeshId) -> Option<Mesh> {
        self.meshes.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeshId, &Mesh)> {
        self.meshes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (MeshId, &mut Mesh)> {
        self.meshes.iter_mut()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}
