//! Physical GPU resource identifiers.
//!
//! Ids are allocated by a render device and are only meaningful to the device
//! that created them. Scene-side assets (textures, skylight cubes, material
//! pipelines) hold them after the asset layer uploads or compiles the resource.

use slotmap::new_key_type;

new_key_type! {
    /// A device buffer.
    pub struct BufferId;
    /// A device image (2D, 2D array or cube).
    pub struct ImageId;
    /// A compiled material GBuffer pipeline.
    pub struct PipelineId;
}
