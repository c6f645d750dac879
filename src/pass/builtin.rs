//! Built-in Shader Stages
//!
//! Inline WGSL for the four stage variants every render pass can be
//! assembled from without any description files: the default opaque
//! render, the FBO-flatten compositor, the stored-instanced render and the
//! shadow pass.
//!
//! The uniform declaration lists below define the uniform-block layouts;
//! each WGSL struct mirrors its list field for field, so the offsets
//! computed by the stage loader and the offsets WGSL assigns agree.

use super::shader_stage::{BufferKind, InputAttribute, StageSources, UniformTag};

/// Selects one of the hard-coded shader programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinStage {
    /// Textured/colored immediate-mode render.
    DefaultRender,
    /// Composites a framebuffer target onto the swapchain as a
    /// full-screen quad with alpha discard.
    Flatten,
    /// Instanced render reading per-instance transforms and a material
    /// table from storage buffers.
    StoredRender,
    /// Depth-only pass from the light's point of view.
    Shadow,
}

const DEFAULT_RENDER_WGSL: &str = r"
struct StageUniforms {
    object_matrix: mat4x4<f32>,
    screen_matrix: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    global_color: vec4<f32>,
    eye_position: vec3<f32>,
    zoom: f32,
    textured: i32,
};

@group(0) @binding(0) var<uniform> u: StageUniforms;
@group(1) @binding(0) var tex: texture_2d<f32>;
@group(1) @binding(1) var tex_sampler: sampler;

struct VsIn {
    @location(0) pos: vec4<f32>,
    @location(1) color: vec4<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) uv: vec2<f32>,
};

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) normal: vec3<f32>,
};

@vertex
fn vs_main(in: VsIn) -> VsOut {
    var out: VsOut;
    out.position = u.screen_matrix * u.object_matrix * in.pos;
    out.uv = in.uv;
    out.color = in.color;
    out.normal = (u.normal_matrix * vec4<f32>(in.normal, 0.0)).xyz;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    var diffuse = in.color * u.global_color;
    if u.textured == 1 {
        diffuse *= textureSample(tex, tex_sampler, in.uv);
    }
    return diffuse;
}
";

const FLATTEN_WGSL: &str = r"
@group(0) @binding(0) var fbo: texture_2d<f32>;
@group(0) @binding(1) var fbo_sampler: sampler;

struct VsIn {
    @location(0) pos: vec2<f32>,
    @location(1) uv: vec2<f32>,
};

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(in: VsIn) -> VsOut {
    var out: VsOut;
    out.position = vec4<f32>(in.pos, 0.0, 1.0);
    out.uv = in.uv;
    return out;
}

const CUTOFF: f32 = 0.0025;

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let c = textureSample(fbo, fbo_sampler, in.uv);
    if c.a > CUTOFF {
        return c;
    }
    return vec4<f32>(0.0);
}
";

const STORED_RENDER_WGSL: &str = r"
struct StageUniforms {
    screen_matrix: mat4x4<f32>,
    object_matrix: mat4x4<f32>,
    normal_matrix: mat4x4<f32>,
    global_color: vec4<f32>,
    eye_position: vec3<f32>,
    zoom: f32,
    textured: i32,
    light_direction: vec3<f32>,
    light_color: vec4<f32>,
};

struct RenderInformation {
    model: mat4x4<f32>,
    normal: mat4x4<f32>,
    color: vec4<f32>,
    material: u32,
    pad0: u32,
    pad1: u32,
    pad2: u32,
};

struct MaterialRecord {
    diffuse: vec4<f32>,
    specular: vec4<f32>,
    exponent: f32,
    pad0: f32,
    pad1: f32,
    pad2: f32,
};

@group(0) @binding(0) var<uniform> u: StageUniforms;
@group(1) @binding(0) var tex: texture_2d<f32>;
@group(1) @binding(1) var tex_sampler: sampler;
@group(2) @binding(0) var<storage, read> instances: array<RenderInformation>;
@group(2) @binding(1) var<storage, read> materials: array<MaterialRecord>;

struct VsIn {
    @location(0) pos: vec4<f32>,
    @location(1) color: vec4<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) uv: vec2<f32>,
};

struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
    @location(1) color: vec4<f32>,
    @location(2) normal: vec3<f32>,
    @location(3) world_pos: vec3<f32>,
    @location(4) @interpolate(flat) material: u32,
};

@vertex
fn vs_main(in: VsIn, @builtin(instance_index) instance: u32) -> VsOut {
    let info = instances[instance];
    let world = info.model * in.pos;
    var out: VsOut;
    out.position = u.screen_matrix * world;
    out.uv = in.uv;
    out.color = in.color * info.color;
    out.normal = (info.normal * vec4<f32>(in.normal, 0.0)).xyz;
    out.world_pos = world.xyz;
    out.material = info.material;
    return out;
}

@fragment
fn fs_main(in: VsOut) -> @location(0) vec4<f32> {
    let mat = materials[in.material];
    var base = in.color * u.global_color * mat.diffuse;
    if u.textured == 1 {
        base *= textureSample(tex, tex_sampler, in.uv);
    }
    let n = normalize(in.normal);
    let l = normalize(-u.light_direction);
    let lambert = max(dot(n, l), 0.0);
    let view_dir = normalize(u.eye_position - in.world_pos);
    let halfway = normalize(l + view_dir);
    let spec = pow(max(dot(n, halfway), 0.0), max(mat.exponent, 1.0));
    let lit = base.rgb * (0.2 + 0.8 * lambert) * u.light_color.rgb
        + mat.specular.rgb * spec * u.light_color.rgb;
    return vec4<f32>(lit, base.a);
}
";

const SHADOW_WGSL: &str = r"
struct StageUniforms {
    light_matrix: mat4x4<f32>,
    object_matrix: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> u: StageUniforms;

@vertex
fn vs_main(@location(0) pos: vec4<f32>) -> @builtin(position) vec4<f32> {
    return u.light_matrix * u.object_matrix * pos;
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
";

/// Standard mesh vertex inputs shared by the render variants.
fn mesh_inputs() -> Vec<InputAttribute> {
    vec![
        InputAttribute {
            name: "pos".to_string(),
            location: 0,
            components: 4,
        },
        InputAttribute {
            name: "color".to_string(),
            location: 1,
            components: 4,
        },
        InputAttribute {
            name: "normal".to_string(),
            location: 2,
            components: 3,
        },
        InputAttribute {
            name: "uv".to_string(),
            location: 3,
            components: 2,
        },
    ]
}

impl BuiltinStage {
    /// Sources and declarations for this variant.
    ///
    /// The uniform order here is the block layout — keep it in sync with
    /// the WGSL structs above.
    #[must_use]
    pub fn sources(self) -> StageSources<'static> {
        match self {
            Self::DefaultRender => StageSources {
                label: "builtin/default",
                vertex: Some(DEFAULT_RENDER_WGSL),
                fragment: Some(DEFAULT_RENDER_WGSL),
                compute: None,
                inputs: mesh_inputs(),
                uniforms: vec![
                    ("objectMatrix", UniformTag::Mat4),
                    ("screenMatrix", UniformTag::Mat4),
                    ("normalMatrix", UniformTag::Mat4),
                    ("globalColor", UniformTag::Vec4),
                    ("eye_position", UniformTag::Vec3),
                    ("zoom", UniformTag::Float),
                    ("textured", UniformTag::Int),
                    ("tex", UniformTag::Sampler),
                ],
                buffers: Vec::new(),
            },
            Self::Flatten => StageSources {
                label: "builtin/flatten",
                vertex: Some(FLATTEN_WGSL),
                fragment: Some(FLATTEN_WGSL),
                compute: None,
                inputs: vec![
                    InputAttribute {
                        name: "pos".to_string(),
                        location: 0,
                        components: 2,
                    },
                    InputAttribute {
                        name: "uv".to_string(),
                        location: 1,
                        components: 2,
                    },
                ],
                uniforms: vec![("FBO", UniformTag::Sampler)],
                buffers: Vec::new(),
            },
            Self::StoredRender => StageSources {
                label: "builtin/stored",
                vertex: Some(STORED_RENDER_WGSL),
                fragment: Some(STORED_RENDER_WGSL),
                compute: None,
                inputs: mesh_inputs(),
                uniforms: vec![
                    ("screenMatrix", UniformTag::Mat4),
                    ("objectMatrix", UniformTag::Mat4),
                    ("normalMatrix", UniformTag::Mat4),
                    ("globalColor", UniformTag::Vec4),
                    ("eye_position", UniformTag::Vec3),
                    ("zoom", UniformTag::Float),
                    ("textured", UniformTag::Int),
                    ("lightDirection", UniformTag::Vec3),
                    ("lightColor", UniformTag::Vec4),
                    ("tex", UniformTag::Sampler),
                ],
                buffers: vec![
                    ("instanceData", BufferKind::Storage),
                    ("materialData", BufferKind::Storage),
                ],
            },
            Self::Shadow => StageSources {
                label: "builtin/shadow",
                vertex: Some(SHADOW_WGSL),
                fragment: Some(SHADOW_WGSL),
                compute: None,
                inputs: mesh_inputs(),
                uniforms: vec![
                    ("lightMatrix", UniformTag::Mat4),
                    ("objectMatrix", UniformTag::Mat4),
                ],
                buffers: Vec::new(),
            },
        }
    }
}
