//! Pass setup API.
//!
//! A pass's setup step receives a [`PassBuilder`], declares every resource it
//! touches and returns its typed pass data. Nothing is recorded here; the
//! declarations are all the graph needs to cull passes and place barriers.

use bumpalo::Bump;
use bytemuck::Pod;
use smallvec::SmallVec;

use super::resource::{Access, BufferHandle, ImageHandle, ResourceDesc, ResourceNode};
use crate::device::{BufferDesc, ImageDesc};

pub(crate) type AccessList = SmallVec<[(u32, Access); 16]>;

pub struct PassBuilder<'g, 'a> {
    pub(crate) resources: &'g mut Vec<ResourceNode>,
    pub(crate) accesses: AccessList,
    pub(crate) side_effect: bool,
    pub(crate) arena: &'a Bump,
}

impl<'g, 'a> PassBuilder<'g, 'a> {
    fn declare(&mut self, resource: u32, access: Access) {
        if let Some(entry) = self.accesses.iter_mut().find(|(r, _)| *r == resource) {
            // one access per resource and pass; a write subsumes a read
            if access.is_write() {
                entry.1 = access;
            }
            return;
        }
        self.accesses.push((resource, access));
    }

    fn push_resource(&mut self, desc: ResourceDesc) -> u32 {
        self.resources.push(ResourceNode {
            desc,
            imported: None,
        });
        (self.resources.len() - 1) as u32
    }

    // ─── Creation ────────────────────────────────────────────────────────

    /// Declares a transient buffer owned by this frame. The pass still has to
    /// declare how it accesses it.
    pub fn create_buffer(&mut self, desc: BufferDesc) -> BufferHandle {
        BufferHandle(self.push_resource(ResourceDesc::Buffer(desc)))
    }

    pub fn create_image(&mut self, desc: ImageDesc) -> ImageHandle {
        ImageHandle(self.push_resource(ResourceDesc::Image(desc)))
    }

    // ─── Declarations ────────────────────────────────────────────────────

    pub fn read_buffer(&mut self, handle: BufferHandle, access: Access) -> BufferHandle {
        debug_assert!(!access.is_write(), "read_buffer with write access {access:?}");
        self.declare(handle.0, access);
        handle
    }

    pub fn write_buffer(&mut self, handle: BufferHandle, access: Access) -> BufferHandle {
        debug_assert!(access.is_write(), "write_buffer with read access {access:?}");
        self.declare(handle.0, access);
        handle
    }

    pub fn read_image(&mut self, handle: ImageHandle, access: Access) -> ImageHandle {
        debug_assert!(!access.is_write(), "read_image with write access {access:?}");
        self.declare(handle.0, access);
        handle
    }

    pub fn write_image(&mut self, handle: ImageHandle, access: Access) -> ImageHandle {
        debug_assert!(access.is_write(), "write_image with read access {access:?}");
        self.declare(handle.0, access);
        handle
    }

    /// Shorthand for a storage read.
    #[inline]
    pub fn read_storage(&mut self, handle: BufferHandle) -> BufferHandle {
        self.read_buffer(handle, Access::ShaderRead)
    }

    /// Shorthand for a storage read-write.
    #[inline]
    pub fn write_storage(&mut self, handle: BufferHandle) -> BufferHandle {
        self.write_buffer(handle, Access::ShaderWrite)
    }

    #[inline]
    pub fn sample_image(&mut self, handle: ImageHandle) -> ImageHandle {
        self.read_image(handle, Access::ShaderRead)
    }

    /// Keeps the pass alive even if nothing consumes its outputs.
    pub fn set_side_effect(&mut self) {
        self.side_effect = true;
    }

    // ─── Frame Arena ─────────────────────────────────────────────────────

    /// Copies upload bytes into the frame arena.
    pub fn alloc_bytes(&self, data: &[u8]) -> &'a [u8] {
        self.arena.alloc_slice_copy(data)
    }

    pub fn alloc_pod<T: Pod>(&self, value: &T) -> &'a [u8] {
        self.alloc_bytes(bytemuck::bytes_of(value))
    }

    pub fn alloc_slice<T: Pod>(&self, values: &[T]) -> &'a [u8] {
        self.alloc_bytes(bytemuck::cast_slice(values))
    }

    /// Moves typed pass data that does not fit a fixed-size struct into the arena.
    pub fn alloc_copy<T: Copy>(&self, values: &[T]) -> &'a [T] {
        self.arena.alloc_slice_copy(values)
    }
}
