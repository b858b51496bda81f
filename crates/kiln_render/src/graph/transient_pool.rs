//! Transient Resource Pool
//!
//! Backs the render graph's per-frame buffers and images with physical device
//! resources. The graph acquires resources while compiling a frame; at frame
//! end every acquisition returns to the free lists for reuse by later frames.
//!
//! # Design
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  TransientPool                        │
//! │                                                      │
//! │  active: [Pooled]              (this frame)          │
//! │  free:   FxHashMap<PoolKey, Vec<Pooled>>             │
//! │                                                      │
//! │  acquire_buffer() / acquire_image()   (compile)      │
//! │  end_frame(max_idle, device)          (frame end)    │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing acquired in a frame aliases anything else acquired in the same
//! frame. Free resources age by one frame per `end_frame`; those idle for
//! longer than `max_idle_frames` are destroyed (resolution changes leave the
//! old sizes behind, and they fall out after a few frames).

use kiln_core::{BufferId, ImageId, Result};
use rustc_hash::FxHashMap;

use crate::command::PhysicalResource;
use crate::device::{BufferDesc, BufferUsage, ImageDesc, ImageDimension, ImageFormat, ImageUsage, RenderDevice};

// ─── Internal Types ───────────────────────────────────────────────────────────

/// Recycling key. Labels are ignored; everything that affects the physical
/// resource participates.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
enum PoolKey {
    Buffer {
        size: u64,
        usage: BufferUsage,
    },
    Image {
        width: u32,
        height: u32,
        layers: u32,
        mip_levels: u32,
        format: ImageFormat,
        dimension: ImageDimension,
        usage: ImageUsage,
    },
}

impl PoolKey {
    fn buffer(desc: &BufferDesc) -> Self {
        Self::Buffer {
            size: desc.size,
            usage: desc.usage,
        }
    }

    fn image(desc: &ImageDesc) -> Self {
        Self::Image {
            width: desc.width,
            height: desc.height,
            layers: desc.layers,
            mip_levels: desc.mip_levels,
            format: desc.format,
            dimension: desc.dimension,
            usage: desc.usage,
        }
    }
}

#[derive(Debug)]
struct Pooled {
    key: PoolKey,
    resource: PhysicalResource,
    bytes: u64,
    /// Frames spent in the free list without reuse.
    idle_frames: u32,
}

// ─── TransientPool ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TransientPool {
    active: Vec<Pooled>,
    free: FxHashMap<PoolKey, Vec<Pooled>>,
}

impl TransientPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire_buffer<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &BufferDesc,
    ) -> Result<BufferId> {
        let key = PoolKey::buffer(desc);
        if let Some(PhysicalResource::Buffer(id)) = self.reuse(&key) {
            return Ok(id);
        }

        let id = device.create_buffer(desc)?;
        self.active.push(Pooled {
            key,
            resource: PhysicalResource::Buffer(id),
            bytes: desc.size,
            idle_frames: 0,
        });
        Ok(id)
    }

    pub fn acquire_image<D: RenderDevice + ?Sized>(
        &mut self,
        device: &mut D,
        desc: &ImageDesc,
    ) -> Result<ImageId> {
        let key = PoolKey::image(desc);
        if let Some(PhysicalResource::Image(id)) = self.reuse(&key) {
            return Ok(id);
        }

        let id = device.create_image(desc)?;
        self.active.push(Pooled {
            key,
            resource: PhysicalResource::Image(id),
            bytes: desc.byte_size(),
            idle_frames: 0,
        });
        Ok(id)
    }

    /// Moves a free resource with a matching key into the active set.
    fn reuse(&mut self, key: &PoolKey) -> Option<PhysicalResource> {
        let mut pooled = self.free.get_mut(key)?.pop()?;
        pooled.idle_frames = 0;
        let resource = pooled.resource;
        self.active.push(pooled);
        Some(resource)
    }

    /// Bytes held by resources acquired this frame.
    #[must_use]
    pub fn active_bytes(&self) -> u64 {
        self.active.iter().map(|p| p.bytes).sum()
    }

    /// Returns every active resource to the free lists, ages the free lists
    /// and destroys resources idle for more than `max_idle_frames`.
    pub fn end_frame<D: RenderDevice + ?Sized>(&mut self, device: &mut D, max_idle_frames: u32) {
        for bucket in self.free.values_mut() {
            for pooled in bucket.iter_mut() {
                pooled.idle_frames += 1;
            }
        }

        for pooled in self.active.drain(..) {
            self.free.entry(pooled.key.clone()).or_default().push(pooled);
        }

        let mut destroyed = 0usize;
        for bucket in self.free.values_mut() {
            bucket.retain(|pooled| {
                if pooled.idle_frames <= max_idle_frames {
                    return true;
                }
                match pooled.resource {
                    PhysicalResource::Buffer(id) => device.destroy_buffer(id),
                    PhysicalResource::Image(id) => device.destroy_image(id),
                }
                destroyed += 1;
                false
            });
        }
        self.free.retain(|_, bucket| !bucket.is_empty());

        if destroyed > 0 {
            log::debug!("TransientPool: released {destroyed} idle resources");
        }
    }

    /// Destroys everything the pool owns.
    pub fn clear<D: RenderDevice + ?Sized>(&mut self, device: &mut D) {
        let free = self.free.drain().flat_map(|(_, bucket)| bucket);
        for pooled in self.active.drain(..).chain(free) {
            match pooled.resource {
                PhysicalResource::Buffer(id) => device.destroy_buffer(id),
                PhysicalResource::Image(id) => device.destroy_image(id),
            }
        }
    }

    /// Number of physical resources owned (active + free).
    #[must_use]
    pub fn total_resource_count(&self) -> usize {
        self.active.len() + self.free.values().map(Vec::len).sum::<usize>()
    }
}
