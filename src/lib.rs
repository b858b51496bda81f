//! # Kiln
//!
//! A GPU-driven visibility-buffer renderer built on a typed render graph.
//!
//! This umbrella crate re-exports the workspace crates under short paths:
//!
//! | Path            | Crate         | Content                                        |
//! |-----------------|---------------|------------------------------------------------|
//! | `kiln::core`    | `kiln_core`   | errors, physical resource ids, dispatch math   |
//! | `kiln::scene`   | `kiln_scene`  | render scene, meshes, materials, camera, lights |
//! | `kiln::render`  | `kiln_render` | render graph, devices, pipeline passes         |
//!
//! ```rust,ignore
//! use kiln::prelude::*;
//!
//! let mut scene = Scene::new();
//! let mut renderer = SceneRenderer::new(SoftwareDevice::new(), 320, 180, RendererSettings::default())?;
//! renderer.on_render_editor(&mut scene, &camera)?;
//! ```

pub use kiln_core as core;
pub use kiln_render as render;
pub use kiln_scene as scene;

pub use kiln_core::{KilnError, Result};

pub mod prelude {
    pub use kiln_core::{BufferId, ImageId, KilnError, PipelineId, Result};
    pub use kiln_render::{
        DefaultResources, FrameReport, FrameStatistics, RenderDevice, RendererSettings,
        SceneRenderer, ShadingMode, SoftwareDevice, VisualizationMode, WgpuDevice,
    };
    pub use kiln_scene::{
        Camera, Light, Material, MeshAsset, RenderObject, RenderScene, Scene, Skylight,
    };
}
