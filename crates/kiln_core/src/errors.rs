//! Error Types
//!
//! This module defines the error types used throughout the renderer.
//!
//! # Overview
//!
//! The main error type [`KilnError`] only covers failures that cannot be handled
//! locally by the rendering pipeline:
//! - GPU initialization failures
//! - Invalid device state (lost device, out of memory, failed buffer mapping)
//! - Render graph misuse detected during compilation
//! - Barrier contract violations reported by the software device
//!
//! Missing assets, failed material pipelines and empty frames are *not* errors;
//! they fall back to default resources and are reported through `log::warn!`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use kiln_core::errors::{KilnError, Result};
//!
//! fn render() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the Kiln renderer.
#[derive(Error, Debug)]
pub enum KilnError {
    // ========================================================================
    // GPU & Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// The device lacks a capability the pipeline cannot work without.
    #[error("Missing device capability: {0}")]
    MissingCapability(&'static str),

    /// Mapping a buffer for CPU readback failed.
    #[error("Buffer readback failed: {0}")]
    ReadbackFailed(String),

    /// The device ran out of memory or was lost.
    #[error("Device lost: {0}")]
    DeviceLost(String),

    /// The GPU backend rejected a command or resource.
    #[error("GPU validation error: {0}")]
    Validation(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A physical buffer id does not exist on the device.
    #[error("Unknown buffer: {0}")]
    UnknownBuffer(String),

    /// A physical image id does not exist on the device.
    #[error("Unknown image: {0}")]
    UnknownImage(String),

    /// A write or read exceeded the bounds of a resource.
    #[error("Out of bounds access on '{label}': offset {offset} + {size} > {capacity}")]
    OutOfBounds {
        label: String,
        offset: u64,
        size: u64,
        capacity: u64,
    },

    /// A shader module failed to compile.
    #[error("Shader compilation failed for '{label}': {message}")]
    ShaderCompilation { label: String, message: String },

    // ========================================================================
    // Render Graph Errors
    // ========================================================================
    /// The render graph was used incorrectly (e.g. reading a never-written resource).
    #[error("Render graph error: {0}")]
    Graph(String),

    /// A pass consumed a resource written by an earlier pass without a barrier in between.
    #[error("Missing barrier before pass '{pass}' for resource '{resource}'")]
    MissingBarrier { pass: String, resource: String },

    // ========================================================================
    // Scene Errors
    // ========================================================================
    /// The render scene exceeds a hard encoding limit.
    #[error("Scene limit exceeded: {0}")]
    SceneLimit(String),
}

/// Alias for `Result<T, KilnError>`.
pub type Result<T> = std::result::Result<T, KilnError>;
