//! Kiln Render
//!
//! The GPU-driven visibility pipeline:
//!
//! - [`graph`]: the frame render graph (pass registration, dead-pass culling,
//!   barrier placement, pooled transient resources)
//! - [`pipeline`]: every pass of the frame, from culling to shading
//! - [`device`]: the [`RenderDevice`] seam with a wgpu backend and a CPU
//!   reference backend
//! - [`renderer`]: [`SceneRenderer`], which owns persistent state and drives a
//!   frame
//!
//! Every frame is a fresh graph: passes declare what they read and write, the
//! compiler drops passes whose outputs nobody consumes, and the executor
//! records one command stream for the device.

pub mod command;
pub mod defaults;
pub mod device;
pub mod graph;
pub mod pipeline;
pub mod renderer;
pub mod settings;

pub use defaults::DefaultResources;
pub use device::{
    BufferDesc, BufferUsage, ImageDesc, ImageFormat, ImageUsage, ReadbackData, RenderDevice,
    SoftwareDevice, WgpuDevice,
};
pub use graph::{Access, FrameReport, GraphPass, PassBuilder, PassKind, RenderGraph, TransientPool};
pub use pipeline::stats::FrameStatistics;
pub use renderer::{FINAL_IMAGE_FORMAT, SceneRenderer};
pub use settings::{GtaoSettings, RendererSettings, ShadingMode, ShadowSettings, VisualizationMode};
