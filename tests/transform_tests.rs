//! Transform Tests
//!
//! Tests for:
//! - Object-matrix composition (translate · rotZ · rotX · rotY · scale)
//! - Bit-exact identity round trip for zero rotation / unit scale
//! - Normal-matrix (inverse-transpose) behavior under non-uniform scale
//! - Screen-space ↔ world-space coordinate helpers

use glam::{Mat4, Vec2, Vec3, Vec4};

use strata::renderer::{build_object_matrix, normal_matrix, screen_from_world, world_from_screen};

const EPSILON: f32 = 1e-5;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

fn approx_vec3(a: Vec3, b: Vec3) -> bool {
    approx(a.x, b.x) && approx(a.y, b.y) && approx(a.z, b.z)
}

// ============================================================================
// Object Matrix
// ============================================================================

#[test]
fn identity_transform_moves_cube_corner_exactly() {
    let pos = Vec3::new(8.0, -16.0, 32.0);
    let m = build_object_matrix(pos, Vec3::ONE, Vec3::ZERO);

    // With no rotation and unit scale the matrix is a pure translation,
    // bit-reproducible on a unit cube's corner.
    let corner = Vec4::new(0.5, 0.5, 0.5, 1.0);
    let moved = m * corner;
    assert_eq!(moved, Vec4::new(8.5, -15.5, 32.5, 1.0));
    assert_eq!(m, Mat4::from_translation(pos));
}

#[test]
fn rotation_composition_is_z_of_x_of_y() {
    // With rot = (π/2 about X, 0, π/2 about Z) the X rotation acts on the
    // vector before the Z rotation: +Y lifts to +Z, which the Z spin then
    // fixes. The reverse order would land on -X instead.
    let half_pi = std::f32::consts::FRAC_PI_2;
    let m = build_object_matrix(Vec3::ZERO, Vec3::ONE, Vec3::new(half_pi, 0.0, half_pi));
    let moved = (m * Vec4::new(0.0, 1.0, 0.0, 1.0)).truncate();
    assert!(
        approx_vec3(moved, Vec3::new(0.0, 0.0, 1.0)),
        "expected (0,0,1), got {moved}"
    );
}

#[test]
fn scale_applies_before_rotation() {
    let half_pi = std::f32::consts::FRAC_PI_2;
    // Scale X by 2, then rotate 90° about Z: the stretched X axis lands
    // on Y with its length preserved.
    let m = build_object_matrix(
        Vec3::ZERO,
        Vec3::new(2.0, 1.0, 1.0),
        Vec3::new(0.0, 0.0, half_pi),
    );
    let moved = (m * Vec4::new(1.0, 0.0, 0.0, 1.0)).truncate();
    assert!(
        approx_vec3(moved, Vec3::new(0.0, 2.0, 0.0)),
        "expected (0,2,0), got {moved}"
    );
}

// ============================================================================
// Normal Matrix
// ============================================================================

#[test]
fn normal_matrix_is_identity_for_rigid_transform() {
    let m = build_object_matrix(Vec3::new(5.0, 6.0, 7.0), Vec3::ONE, Vec3::ZERO);
    let n = normal_matrix(m);
    for i in 0..3 {
        for j in 0..3 {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!(approx(n.col(i)[j], expected));
        }
    }
}

#[test]
fn normal_matrix_inverts_non_uniform_scale() {
    let m = Mat4::from_scale(Vec3::new(2.0, 4.0, 1.0));
    let n = normal_matrix(m);
    // Inverse-transpose of a diagonal scale is the reciprocal scale.
    assert!(approx(n.x_axis.x, 0.5));
    assert!(approx(n.y_axis.y, 0.25));
    assert!(approx(n.z_axis.z, 1.0));
}

#[test]
fn normal_matrix_keeps_normals_perpendicular() {
    let m = build_object_matrix(
        Vec3::ZERO,
        Vec3::new(3.0, 1.0, 1.0),
        Vec3::new(0.3, 0.2, 0.1),
    );
    let n = normal_matrix(m);

    // A surface tangent and its normal must stay perpendicular after the
    // respective transforms.
    let tangent = Vec3::new(1.0, 0.0, 0.0);
    let normal = Vec3::new(0.0, 0.0, 1.0);
    let moved_tangent = (m * tangent.extend(0.0)).truncate();
    let moved_normal = (n * normal.extend(0.0)).truncate();
    assert!(
        moved_tangent.dot(moved_normal).abs() < EPSILON,
        "normal must stay perpendicular to the surface"
    );
}

// ============================================================================
// Coordinate Spaces
// ============================================================================

#[test]
fn screen_center_maps_to_camera_origin() {
    let window = Vec2::new(1280.0, 720.0);
    let world = world_from_screen(Vec2::new(640.0, 360.0), window, 1.0, Vec2::ZERO);
    assert!(approx(world.x, 0.0));
    assert!(approx(world.y, 0.0));
}

#[test]
fn screen_round_trip_mirrors_y() {
    // Screen space points down where world space points up, so the round
    // trip preserves x and negates y.
    let window = Vec2::new(1280.0, 720.0);
    let zoom = 1.0;
    let camera = Vec2::ZERO;

    for &point in &[
        Vec2::new(0.0, 0.0),
        Vec2::new(100.0, -50.0),
        Vec2::new(-320.0, 200.0),
    ] {
        let screen = screen_from_world(point, window, zoom, camera);
        let back = world_from_screen(screen, window, zoom, camera);
        assert!(
            approx(back.x, point.x) && approx(back.y, -point.y),
            "round trip failed for {point}: got {back}"
        );
    }
}

#[test]
fn zoom_scales_world_distance() {
    let window = Vec2::new(800.0, 600.0);
    // A point 100px right of center covers twice the world distance at
    // half zoom.
    let near = world_from_screen(Vec2::new(500.0, 300.0), window, 1.0, Vec2::ZERO);
    let far = world_from_screen(Vec2::new(500.0, 300.0), window, 0.5, Vec2::ZERO);
    assert!(approx(near.x * 2.0, far.x));
}
