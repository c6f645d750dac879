//! Texture Registry
//!
//! A use-counted cache of GPU textures keyed by name and addressed by
//! [`TextureId`]. File decoding is out of scope — callers hand the
//! registry decoded RGBA8 pixels. Entries that go unused decay and are
//! pruned after a configurable number of idle frames, the same strategy
//! the engine uses for transient targets.
//!
//! Load failure is informational, not fatal: `create_from_memory` returns
//! `None` and the renderer records [`crate::errors::ErrorState`] for the
//! host to poll.

use glam::Vec2;
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use crate::gpu::{GpuContext, next_resource_id};

slotmap::new_key_type! {
    /// Handle to a texture in the [`TextureRegistry`].
    pub struct TextureId;
}

/// Number of addressable texture units.
pub const TEXTURE_UNITS: usize = 32;

/// An uploaded texture and its sampling view.
pub struct GpuTexture {
    pub name: String,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    id: u64,
    width: u32,
    height: u32,
    idle_frames: u32,
}

impl GpuTexture {
    #[must_use]
    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    #[must_use]
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    /// Cache id of this allocation, used to key bind-group caches.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }
}

/// Name-deduplicated texture cache with idle-frame eviction.
#[derive(Default)]
pub struct TextureRegistry {
    textures: SlotMap<TextureId, GpuTexture>,
    by_name: FxHashMap<String, TextureId>,
}

impl TextureRegistry {
    /// Upload RGBA8 pixels as a texture, or return the existing entry with
    /// the same name.
    ///
    /// Returns `None` when the dimensions and pixel buffer disagree —
    /// asset trouble is a normal, recoverable condition for the host.
    pub fn create_from_memory(
        &mut self,
        gpu: &GpuContext,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Option<TextureId> {
        if let Some(&id) = self.by_name.get(name) {
            if let Some(entry) = self.textures.get_mut(id) {
                entry.idle_frames = 0;
            }
            return Some(id);
        }
        if width == 0 || height == 0 || pixels.len() != (width * height * 4) as usize {
            log::warn!("texture '{name}' rejected: {width}x{height} with {} bytes", pixels.len());
            return None;
        }

        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(name),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
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
            pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * 4),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let id = self.textures.insert(GpuTexture {
            name: name.to_string(),
            texture,
            view,
            id: next_resource_id(),
            width,
            height,
            idle_frames: 0,
        });
        self.by_name.insert(name.to_string(), id);
        Some(id)
    }

    #[must_use]
    pub fn get(&self, id: TextureId) -> Option<&GpuTexture> {
        self.textures.get(id)
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<TextureId> {
        self.by_name.get(name).copied()
    }

    /// Mark a texture as used this frame.
    pub fn touch(&mut self, id: TextureId) {
        if let Some(entry) = self.textures.get_mut(id) {
            entry.idle_frames = 0;
        }
    }

    /// Drop a texture immediately.
    pub fn remove(&mut self, id: TextureId) {
        if let Some(entry) = self.textures.remove(id) {
            self.by_name.remove(&entry.name);
        }
    }

    /// Advance idle counters; call once per frame.
    pub fn next_frame(&mut self) {
        for entry in self.textures.values_mut() {
            entry.idle_frames = entry.idle_frames.saturating_add(1);
        }
    }

    /// Evict entries idle for more than `max_idle_frames`.
    pub fn prune(&mut self, max_idle_frames: u32) {
        let stale: Vec<TextureId> = self
            .textures
            .iter()
            .filter(|(_, t)| t.idle_frames > max_idle_frames)
            .map(|(id, _)| id)
            .collect();
        for id in stale {
            self.remove(id);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }
}

/// The renderer's texture-unit table: which view feeds each sampler unit.
///
/// Shader stages cache their texture bind groups against the ids recorded
/// here; rebinding a unit with a different view invalidates those caches.
pub struct TextureUnits {
    slots: [Option<(u64, wgpu::TextureView)>; TEXTURE_UNITS],
}

impl Default for TextureUnits {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl TextureUnits {
    pub fn set(&mut self, unit: u32, id: u64, view: wgpu::TextureView) {
        if let Some(slot) = self.slots.get_mut(unit as usize) {
            *slot = Some((id, view));
        }
    }

    pub fn clear(&mut self, unit: u32) {
        if let Some(slot) = self.slots.get_mut(unit as usize) {
            *slot = None;
        }
    }

    /// Cache id of the view bound to `unit`, 0 when the unit is empty.
    #[must_use]
    pub fn id_of(&self, unit: u32) -> u64 {
        self.slots
            .get(unit as usize)
            .and_then(|slot| slot.as_ref())
            .map_or(0, |(id, _)| *id)
    }

    #[must_use]
    pub fn view_of(&self, unit: u32) -> Option<&wgpu::TextureView> {
        self.slots
            .get(unit as usize)
            .and_then(|slot| slot.as_ref())
            .map(|(_, view)| view)
    }
}
