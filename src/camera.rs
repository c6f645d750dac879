//! Camera
//!
//! A lazily-rebuilt view transform: position, per-axis rotation (degrees),
//! and zoom. Mutators only flip a dirty flag; the 4×4 matrix is rebuilt on
//! the next [`Camera::matrix`] call, so camera churn between frames costs
//! nothing until the renderer actually reads the matrix.

use glam::{Mat4, Vec2, Vec3};

/// The process-wide camera owned by [`crate::renderer::Renderer`].
///
/// The view matrix composes `scale(zoom) · rotZ · rotX · rotY ·
/// translate(position)` — the Z rotation is applied first, matching the
/// object-matrix convention of the draw API.
#[derive(Debug, Clone)]
pub struct Camera {
    position: Vec3,
    /// Per-axis rotation in degrees.
    rotation: Vec3,
    zoom: f32,
    matrix: Mat4,
    dirty: bool,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            zoom: 1.0,
            matrix: Mat4::IDENTITY,
            dirty: true,
        }
    }
}

impl Camera {
    /// Current camera position, projected onto the XY plane.
    #[must_use]
    pub fn position(&self) -> Vec2 {
        self.position.truncate()
    }

    /// Full 3D camera position.
    #[must_use]
    pub fn position_3d(&self) -> Vec3 {
        self.position
    }

    /// The view matrix, rebuilt if any mutator ran since the last call.
    pub fn matrix(&mut self) -> Mat4 {
        if self.dirty {
            self.matrix = Mat4::from_scale(Vec3::splat(self.zoom))
                * Mat4::from_rotation_z(self.rotation.z.to_radians())
                * Mat4::from_rotation_x(self.rotation.x.to_radians())
                * Mat4::from_rotation_y(self.rotation.y.to_radians())
                * Mat4::from_translation(self.position);
            self.dirty = false;
        }
        self.matrix
    }

    /// Move the camera to a new 3D position.
    pub fn move_to(&mut self, pos: Vec3) {
        self.position = pos;
        self.dirty = true;
    }

    /// Move the camera on the XY plane, keeping its current depth.
    pub fn move_to_2d(&mut self, pos: Vec2) {
        self.position = pos.extend(self.position.z);
        self.dirty = true;
    }

    /// Set the camera rotation (degrees per axis).
    pub fn rotate_to(&mut self, rot: Vec3) {
        self.rotation = rot;
        self.dirty = true;
    }

    /// Set the camera zoom factor.
    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom;
        self.dirty = true;
    }

    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_when_untouched() {
        let mut cam = Camera::default();
        assert_eq!(cam.matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn matrix_rebuilds_after_mutation() {
        let mut cam = Camera::default();
        let before = cam.matrix();
        cam.move_to(Vec3::new(10.0, 0.0, 0.0));
        let after = cam.matrix();
        assert_ne!(before, after);
        assert_eq!(
            after,
            Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            "translation-only camera should be a pure translation"
        );
    }

    #[test]
    fn zoom_scales_uniformly() {
        let mut cam = Camera::default();
        cam.set_zoom(2.0);
        let m = cam.matrix();
        assert_eq!(m.x_axis.x, 2.0);
        assert_eq!(m.y_axis.y, 2.0);
        assert_eq!(m.z_axis.z, 2.0);
    }
}
