//! GPU Context
//!
//! Owns the wgpu instance, adapter, device and queue. Created once at
//! renderer construction and shared (via `Arc`ed device/queue handles) by
//! every subsystem that talks to the GPU. Surfaces are created later, per
//! window — the adapter is requested without a compatible surface so the
//! backend can also run fully headless.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Result, StrataError};

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Hand out a process-unique id for a GPU resource.
///
/// Bind-group caches key on these ids; a recreated texture or view gets a
/// fresh id, which is what invalidates the dependent bind groups.
pub(crate) fn next_resource_id() -> u64 {
    NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Device/queue pair plus the instance and adapter they came from.
pub struct GpuContext {
    pub instance: wgpu::Instance,
    pub adapter: wgpu::Adapter,
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
}

impl GpuContext {
    /// Request a high-performance adapter and create the device.
    ///
    /// Optional features (non-fill polygon modes for the wireframe/point
    /// fill modes) are enabled only when the adapter offers them.
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::new_without_display_handle());

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| StrataError::AdapterRequestFailed(e.to_string()))?;

        let wanted =
            wgpu::Features::POLYGON_MODE_LINE | wgpu::Features::POLYGON_MODE_POINT;
        let required_features = adapter.features() & wanted;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("Strata Device"),
            required_features,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        }))?;

        log::info!("GPU adapter: {}", adapter.get_info().name);

        Ok(Self {
            instance,
            adapter,
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }

    /// Whether the device can rasterize with the given polygon mode.
    #[must_use]
    pub fn supports_polygon_mode(&self, mode: wgpu::PolygonMode) -> bool {
        match mode {
            wgpu::PolygonMode::Fill => true,
            wgpu::PolygonMode::Line => self
                .device
                .features()
                .contains(wgpu::Features::POLYGON_MODE_LINE),
            wgpu::PolygonMode::Point => self
                .device
                .features()
                .contains(wgpu::Features::POLYGON_MODE_POINT),
        }
    }

    /// Submit an empty batch, flushing any queued writes to the GPU.
    ///
    /// Used when switching between windows so one window's pending work is
    /// not reordered past another's.
    pub fn flush(&self) {
        self.queue.submit(std::iter::empty());
    }
}
