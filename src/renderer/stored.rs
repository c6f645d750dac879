//! Stored-Render Machinery
//!
//! The CPU side of deferred ("stored") rendering: the per-instance record
//! appended by draw calls, and the deduplicated material table uploaded
//! once per frame as a storage buffer. Both structs are `Pod` and mirror
//! the storage-buffer structs of the built-in stored-render shader
//! byte for byte.

use glam::{Mat4, Vec4};

/// One deferred draw: transform, normal transform, tint and material.
///
/// Appended to a mesh's batch by `add_call` and consumed by the one
/// instanced draw that flushes the batch.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct RenderInformation {
    pub model: Mat4,
    /// Inverse-transpose of the model's upper 3×3, widened for storage
    /// alignment.
    pub normal: Mat4,
    pub color: Vec4,
    /// Index into the frame's material table.
    pub material: u32,
    pub _pad: [u32; 3],
}

impl Default for RenderInformation {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            normal: Mat4::IDENTITY,
            color: Vec4::ONE,
            material: 0,
            _pad: [0; 3],
        }
    }
}

/// One entry of the packed material table.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRecord {
    pub diffuse: Vec4,
    pub specular: Vec4,
    pub exponent: f32,
    pub _pad: [f32; 3],
}

impl Default for MaterialRecord {
    fn default() -> Self {
        Self {
            diffuse: Vec4::ONE,
            specular: Vec4::ZERO,
            exponent: 1.0,
            _pad: [0.0; 3],
        }
    }
}

/// Frame-global material table, deduplicated by exact
/// `(diffuse, specular, exponent)` match.
///
/// Instead of one uniform write per instance, stored draws record an index
/// into this table; the table itself uploads once per frame. Indices are
/// append-only for the run — material churn is expected to be static.
/// Hosts with genuinely dynamic material sets can [`clear`](Self::clear)
/// between frames.
pub struct MaterialTable {
    records: Vec<MaterialRecord>,
    dirty: bool,
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self {
            // Index 0 is the implicit material of draws that never called
            // set_material.
            records: vec![MaterialRecord::default()],
            dirty: true,
        }
    }
}

impl MaterialTable {
    /// Return the index of an identical record, or append a new one.
    pub fn intern(&mut self, diffuse: Vec4, specular: Vec4, exponent: f32) -> u32 {
        let record = MaterialRecord {
            diffuse,
            specular,
            exponent,
            _pad: [0.0; 3],
        };
        if let Some(index) = self.records.iter().position(|r| *r == record) {
            return index as u32;
        }
        self.records.push(record);
        self.dirty = true;
        (self.records.len() - 1) as u32
    }

    #[must_use]
    pub fn records(&self) -> &[MaterialRecord] {
        &self.records
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.records)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the table changed since the last upload; clears the flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Drop every interned material, re-seeding the implicit default.
    pub fn clear(&mut self) {
        self.records.clear();
        self.records.push(MaterialRecord::default());
        self.dirty = true;
    }
}
