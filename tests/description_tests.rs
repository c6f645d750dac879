//! Description-File Tests
//!
//! Tests for:
//! - Render-pass description parsing (<Stages>, <FBOs>, <Buffers>)
//! - Shader-stage description parsing (<Vertex>/<Fragment>/<Compute>,
//!   <In>, <Uniform>, <Buffers>)
//! - Malformed-entry error reporting

use strata::StrataError;
use strata::pass::description::{parse_pass_description, parse_stage_description};
use strata::pass::shader_stage::{BufferKind, UniformTag};
use strata::pass::stage::RenderStage;

// ============================================================================
// Render-Pass Descriptions
// ============================================================================

#[test]
fn parses_stages_fbos_and_buffers() {
    let text = "\
<Stages>
shaders/sprite[1]=0
shaders/glow[3]=0
</Stages>
<FBOs>
glowTarget=3
</FBOs>
<Buffers>
particles[0]
</Buffers>
";
    let description = parse_pass_description("test.rpass", text).unwrap();

    assert_eq!(description.stages.len(), 2);
    let sprite = &description.stages[0];
    assert_eq!(sprite.path, "shaders/sprite");
    assert_eq!(sprite.name, "sprite", "pass name is the last path segment");
    assert_eq!(sprite.stage, RenderStage::PrimaryRender);
    assert_eq!(sprite.ordinal, 0);
    assert_eq!(description.stages[1].stage, RenderStage::PostRender);

    assert_eq!(description.fbos.len(), 1);
    assert_eq!(description.fbos[0].name, "glowTarget");
    assert_eq!(description.fbos[0].stage, RenderStage::PostRender);

    assert_eq!(description.buffers.len(), 1);
    assert_eq!(description.buffers[0].kind, BufferKind::Storage);
}

#[test]
fn section_tags_are_case_insensitive() {
    let text = "\
<stages>
main[1]=0
</STAGES>
";
    let description = parse_pass_description("test.rpass", text).unwrap();
    assert_eq!(description.stages.len(), 1);
}

#[test]
fn blank_lines_and_comments_are_skipped() {
    let text = "\

# the main pass
<Stages>

main[1]=0
</Stages>
";
    let description = parse_pass_description("test.rpass", text).unwrap();
    assert_eq!(description.stages.len(), 1);
}

#[test]
fn out_of_range_stage_index_is_an_error() {
    let text = "\
<Stages>
main[9]=0
</Stages>
";
    let err = parse_pass_description("test.rpass", text).unwrap_err();
    match err {
        StrataError::DescriptionParse { line, .. } => assert_eq!(line, 2),
        other => panic!("expected DescriptionParse, got {other:?}"),
    }
}

#[test]
fn unknown_section_is_an_error() {
    let err = parse_pass_description("test.rpass", "<Wibble>\n</Wibble>\n").unwrap_err();
    assert!(matches!(err, StrataError::DescriptionParse { .. }));
}

// ============================================================================
// Shader-Stage Descriptions
// ============================================================================

#[test]
fn parses_a_full_stage_description() {
    let text = "\
<Vertex>
sprite.wgsl
<Fragment>
sprite.wgsl
<In>
pos[4]=0
color[4]=1
uv[2]=3
</In>
<Uniform>
objectMatrix[64]
globalColor[16]
zoom[4]
textured[1]
tex[unique]
</Uniform>
<Buffers>
particles[0]
</Buffers>
";
    let description = parse_stage_description("sprite.meta", text).unwrap();

    assert_eq!(description.vertex.as_deref(), Some("sprite.wgsl"));
    assert_eq!(description.fragment.as_deref(), Some("sprite.wgsl"));
    assert!(description.compute.is_none());

    assert_eq!(description.inputs.len(), 3);
    assert_eq!(description.inputs[0].name, "pos");
    assert_eq!(description.inputs[0].components, 4);
    assert_eq!(description.inputs[2].location, 3);

    // Declaration order defines the uniform-block layout.
    let tags: Vec<UniformTag> = description.uniforms.iter().map(|(_, t)| *t).collect();
    assert_eq!(
        tags,
        vec![
            UniformTag::Mat4,
            UniformTag::Vec4,
            UniformTag::Float,
            UniformTag::Int,
            UniformTag::Sampler,
        ]
    );

    assert_eq!(description.buffers, vec![("particles".to_string(), BufferKind::Storage)]);
}

#[test]
fn compute_stage_parses_alone() {
    let text = "\
<Compute>
simulate.wgsl
<Buffers>
state[0]
</Buffers>
";
    let description = parse_stage_description("simulate.meta", text).unwrap();
    assert_eq!(description.compute.as_deref(), Some("simulate.wgsl"));
    assert!(description.vertex.is_none());
}

#[test]
fn compute_cannot_join_a_graphics_pipeline() {
    let text = "\
<Vertex>
sprite.wgsl
<Compute>
simulate.wgsl
";
    let err = parse_stage_description("bad.meta", text).unwrap_err();
    assert!(matches!(err, StrataError::DescriptionParse { .. }));
}

#[test]
fn unknown_uniform_tag_is_an_error() {
    let text = "\
<Vertex>
sprite.wgsl
<Uniform>
weird[7]
</Uniform>
";
    let err = parse_stage_description("bad.meta", text).unwrap_err();
    match err {
        StrataError::DescriptionParse { message, .. } => {
            assert!(message.contains('7'), "message should name the bad tag: {message}");
        }
        other => panic!("expected DescriptionParse, got {other:?}"),
    }
}

#[test]
fn sourceless_description_is_an_error() {
    let text = "\
<Uniform>
zoom[4]
</Uniform>
";
    assert!(parse_stage_description("bad.meta", text).is_err());
}
