//! Kiln Core
//!
//! Foundational types shared by every Kiln crate:
//!
//! - [`errors`]: the engine-wide error enum and `Result` alias
//! - [`ids`]: physical buffer/image/pipeline identifiers handed out by render devices
//! - [`math`]: dispatch sizing and frustum helpers used on both sides of the CPU/GPU boundary

pub mod errors;
pub mod ids;
pub mod math;

pub use errors::{KilnError, Result};
pub use ids::{BufferId, ImageId, PipelineId};
