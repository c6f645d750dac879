//! Stored-Render Tests
//!
//! Tests for:
//! - Mesh instance-batch accumulation, drain and reset
//! - Material-table deduplication by exact attribute match
//! - Vertex preparation (fan expansion, face normals)
//! - GPU-struct layouts matching the storage-buffer declarations

use glam::{Mat4, Vec2, Vec3, Vec4};

use strata::mesh::{DrawMode, Mesh, Vertex, prepare_vertices};
use strata::renderer::stored::{MaterialRecord, MaterialTable, RenderInformation};

fn quad() -> Vec<Vertex> {
    vec![
        Vertex::new(Vec4::new(-0.5, -0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(0.0, 1.0)),
        Vertex::new(Vec4::new(-0.5, 0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(0.0, 0.0)),
        Vertex::new(Vec4::new(0.5, 0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(1.0, 0.0)),
        Vertex::new(Vec4::new(0.5, -0.5, 0.0, 1.0), Vec4::ONE, Vec2::new(1.0, 1.0)),
    ]
}

// ============================================================================
// Instance Batching
// ============================================================================

#[test]
fn add_call_accumulates_without_touching_vertices() {
    let mut mesh = Mesh::from_vertices(DrawMode::TriangleFan, quad());
    for i in 0..5 {
        mesh.add_call(RenderInformation {
            model: Mat4::from_translation(Vec3::new(i as f32, 0.0, 0.0)),
            ..RenderInformation::default()
        });
    }
    assert_eq!(mesh.calls().len(), 5);
    assert_eq!(mesh.vertices().len(), 4, "batching must not mutate geometry");
}

#[test]
fn reset_leaves_batch_empty() {
    let mut mesh = Mesh::from_vertices(DrawMode::TriangleFan, quad());
    for _ in 0..3 {
        mesh.add_call(RenderInformation::default());
    }
    mesh.reset();
    assert!(mesh.calls().is_empty());

    // A drained mesh accumulates fresh batches from zero.
    mesh.add_call(RenderInformation::default());
    assert_eq!(mesh.calls().len(), 1);
}

#[test]
fn batch_preserves_call_order() {
    let mut mesh = Mesh::from_vertices(DrawMode::Triangles, quad());
    for i in 0..4 {
        mesh.add_call(RenderInformation {
            material: i,
            ..RenderInformation::default()
        });
    }
    let materials: Vec<u32> = mesh.calls().iter().map(|c| c.material).collect();
    assert_eq!(materials, vec![0, 1, 2, 3]);
}

// ============================================================================
// Material Deduplication
// ============================================================================

#[test]
fn identical_materials_share_an_index() {
    let mut table = MaterialTable::default();
    let before = table.len();

    let first = table.intern(Vec4::new(0.8, 0.2, 0.2, 1.0), Vec4::ONE, 32.0);
    let second = table.intern(Vec4::new(0.8, 0.2, 0.2, 1.0), Vec4::ONE, 32.0);

    assert_eq!(first, second);
    assert_eq!(table.len(), before + 1, "table must grow by exactly one entry");
}

#[test]
fn distinct_materials_get_distinct_indices() {
    let mut table = MaterialTable::default();
    let red = table.intern(Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::ZERO, 8.0);
    let blue = table.intern(Vec4::new(0.0, 0.0, 1.0, 1.0), Vec4::ZERO, 8.0);
    let shiny_red = table.intern(Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::ZERO, 64.0);

    assert_ne!(red, blue);
    assert_ne!(red, shiny_red, "exponent participates in the identity");
}

#[test]
fn dirty_flag_tracks_growth() {
    let mut table = MaterialTable::default();
    assert!(table.take_dirty(), "fresh table must upload once");
    assert!(!table.take_dirty());

    table.intern(Vec4::ONE, Vec4::ZERO, 2.0);
    assert!(table.take_dirty());

    // Re-interning an existing record does not re-upload.
    table.intern(Vec4::ONE, Vec4::ZERO, 2.0);
    assert!(!table.take_dirty());
}

#[test]
fn clear_reseeds_the_default_material() {
    let mut table = MaterialTable::default();
    table.intern(Vec4::ONE, Vec4::ONE, 4.0);
    table.clear();
    assert_eq!(table.len(), 1);
    assert_eq!(table.records()[0], MaterialRecord::default());
}

// ============================================================================
// Vertex Preparation
// ============================================================================

#[test]
fn triangle_fan_expands_to_list() {
    let (expanded, mode) = prepare_vertices(&quad(), DrawMode::TriangleFan);
    assert_eq!(mode, DrawMode::Triangles);
    // 4-vertex fan → 2 triangles.
    assert_eq!(expanded.len(), 6);
    assert_eq!(expanded[0].pos, expanded[3].pos, "fan pivot repeats");
    assert_eq!(expanded[2].pos, expanded[4].pos, "strip edge repeats");
}

#[test]
fn line_loop_closes_itself() {
    let verts = quad();
    let (expanded, mode) = prepare_vertices(&verts, DrawMode::LineLoop);
    assert_eq!(mode, DrawMode::LineStrip);
    assert_eq!(expanded.len(), 5);
    assert_eq!(expanded[0].pos, expanded[4].pos);
}

#[test]
fn triangles_get_face_normals() {
    let tri = vec![
        Vertex::new(Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::ONE, Vec2::ZERO),
        Vertex::new(Vec4::new(1.0, 0.0, 0.0, 1.0), Vec4::ONE, Vec2::ZERO),
        Vertex::new(Vec4::new(0.0, 1.0, 0.0, 1.0), Vec4::ONE, Vec2::ZERO),
    ];
    let (expanded, _) = prepare_vertices(&tri, DrawMode::Triangles);
    for vertex in &expanded {
        assert_eq!(
            vertex.normal,
            Vec3::Z,
            "counter-clockwise XY triangle faces +Z, unsmoothed"
        );
    }
}

#[test]
fn other_modes_pass_through_unchanged() {
    let verts = quad();
    let (expanded, mode) = prepare_vertices(&verts, DrawMode::TriangleStrip);
    assert_eq!(mode, DrawMode::TriangleStrip);
    assert_eq!(expanded.len(), verts.len());
}

// ============================================================================
// GPU Layouts
// ============================================================================

#[test]
fn gpu_struct_sizes_match_shader_declarations() {
    // These must agree with the storage-buffer structs of the stored
    // render shader: two mat4s, a vec4, and a padded u32 / padded f32.
    assert_eq!(std::mem::size_of::<RenderInformation>(), 160);
    assert_eq!(std::mem::size_of::<MaterialRecord>(), 48);
    assert_eq!(std::mem::size_of::<Vertex>(), 52);
}
