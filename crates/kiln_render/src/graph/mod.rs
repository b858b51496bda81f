//! Frame render graph: pass registration, culling, barrier placement and
//! transient resource realization.

mod builder;
mod context;
#[allow(clippy::module_inception)]
mod graph;
mod resource;
mod transient_pool;

pub use builder::PassBuilder;
pub use context::{PassResources, RenderContext};
pub use graph::{CompiledGraph, FrameOutput, FrameReport, GraphPass, RenderGraph};
pub use resource::{Access, BufferHandle, ImageHandle, PassKind};
pub use transient_pool::TransientPool;
