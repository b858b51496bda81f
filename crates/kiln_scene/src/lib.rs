//! Kiln Scene
//!
//! The read-side collaborators of the visibility pipeline. The renderer never
//! mutates anything in here during a frame; it only reads:
//!
//! - [`RenderScene`]: registered render objects and their packed GPU records
//! - [`Camera`]: projection/view matrices, clip planes, jitter
//! - [`Light`] / [`Skylight`]: enumerated once per frame through [`Scene::for_each_light`]
//! - [`Material`] / [`MeshAsset`]: resolved through the [`AssetStore`]

pub mod assets;
pub mod camera;
pub mod gpu_types;
pub mod light;
pub mod material;
pub mod mesh;
pub mod render_scene;
pub mod scene;

pub use assets::{AssetResolver, AssetState, AssetStore, MaterialHandle, MeshHandle};
pub use camera::{Camera, Projection};
pub use gpu_types::*;
pub use light::{DirectionalLight, Light, LightId, PointLight, Skylight, SpotLight};
pub use material::Material;
pub use mesh::{MeshAsset, Meshlet, SubMesh, Vertex};
pub use render_scene::{RenderObject, RenderObjectId, RenderScene};
pub use scene::Scene;
