//! Graph resource handles and access kinds.

use crate::command::PhysicalResource;
use crate::device::{BufferDesc, ImageDesc};

/// Compute-vs-graphics flag of a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Compute,
    Raster,
    Transfer,
}

/// How a pass touches a resource. Barriers are derived from changes between
/// consecutive accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Uniform,
    ShaderRead,
    /// Storage read-write (atomics included).
    ShaderWrite,
    IndirectArgs,
    IndexBuffer,
    ColorTarget,
    DepthWrite,
    /// Depth attachment with writes disabled (equal test).
    DepthRead,
    TransferWrite,
    /// Copy to a host-visible staging buffer.
    HostRead,
    /// Final layout for display or copy-out.
    Present,
}

impl Access {
    #[inline]
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(
            self,
            Self::ShaderWrite | Self::ColorTarget | Self::DepthWrite | Self::TransferWrite
        )
    }
}

/// Graph-local buffer handle, valid for the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u32);

/// Graph-local image handle, valid for the graph that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub(crate) u32);

impl BufferHandle {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl ImageHandle {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ResourceDesc {
    Buffer(BufferDesc),
    Image(ImageDesc),
}

impl ResourceDesc {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Buffer(desc) => desc.label,
            Self::Image(desc) => desc.label,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ResourceNode {
    pub desc: ResourceDesc,
    /// Persistent resource owned outside the graph.
    pub imported: Option<PhysicalResource>,
}

impl ResourceNode {
    pub(crate) fn is_imported(&self) -> bool {
        self.imported.is_some()
    }
}
