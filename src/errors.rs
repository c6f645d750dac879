//! Error Types
//!
//! This module defines the error types used throughout the backend.
//!
//! # Overview
//!
//! The main error type [`StrataError`] covers the fatal failure modes:
//! GPU initialization, shader compilation, and render-pass contract
//! violations (missing uniforms, bad framebuffer ids). All public APIs that
//! can fail return [`Result<T>`], an alias for
//! `std::result::Result<T, StrataError>`.
//!
//! Non-fatal conditions — a texture or font that failed to load — do not
//! produce a `StrataError`. They return `None` and record an [`ErrorState`]
//! on the renderer, which the host application may poll and clear. This
//! split mirrors the failure taxonomy of the backend: pipeline
//! misconfiguration fails fast and loudly, asset trouble is a normal
//! application-recoverable condition.

use thiserror::Error;

/// The main error type for the Strata backend.
///
/// Every variant represents a condition that is fatal to the current frame
/// (and usually to the run): a misconfigured render pass, a shader that
/// does not compile, or a GPU that could not be initialized.
#[derive(Error, Debug)]
pub enum StrataError {
    // ========================================================================
    // GPU & Device Errors
    // ========================================================================
    /// Failed to request a compatible GPU adapter.
    #[error("Failed to request WGPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// Failed to create the GPU device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceCreateFailed(#[from] wgpu::RequestDeviceError),

    /// Failed to create a surface for a window.
    #[error("Failed to create surface: {0}")]
    SurfaceCreateFailed(#[from] wgpu::CreateSurfaceError),

    /// The surface has no supported configuration on this adapter.
    #[error("Surface is not supported by the active adapter")]
    SurfaceUnsupported,

    // ========================================================================
    // Render-Pass Contract Errors
    // ========================================================================
    /// A shader failed WGSL validation or pipeline creation.
    #[error("Shader stage '{stage}' failed to compile: {message}")]
    ShaderCompile {
        /// Name of the shader stage being built
        stage: String,
        /// Validation output from the GPU backend
        message: String,
    },

    /// The active shader stage does not declare a uniform the renderer
    /// requires.
    #[error("Render stage '{stage}' must declare a uniform named '{uniform}'")]
    MissingUniform {
        /// Name of the offending shader stage
        stage: String,
        /// The required uniform name
        uniform: &'static str,
    },

    /// The render pass has no stage with the given name.
    #[error("Render pass has no shader stage named '{0}'")]
    NoSuchStage(String),

    /// An FBO id was bound that no target answers to.
    #[error("Attempted to bind non existent FBO {0}")]
    NoSuchFrameBuffer(i32),

    /// A texture was bound to a unit outside the valid range.
    #[error("Attempted to bind to non-existent texture unit {0}")]
    InvalidTextureUnit(i32),

    /// There is no live window left to render into.
    #[error("No live window available")]
    NoLiveWindow,

    // ========================================================================
    // Description-File Errors
    // ========================================================================
    /// A render-pass or shader-stage description file failed to parse.
    #[error("Description parse error ({path}:{line}): {message}")]
    DescriptionParse {
        /// Path of the offending file
        path: String,
        /// 1-based line number
        line: usize,
        /// What went wrong
        message: String,
    },

    // ========================================================================
    // I/O Errors
    // ========================================================================
    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Alias for `Result<T, StrataError>`.
pub type Result<T> = std::result::Result<T, StrataError>;

/// Global error state queryable by the host application.
///
/// Informational failures (asset loading, shutdown hiccups) set this state
/// instead of returning an error; the host polls it with
/// [`crate::renderer::Renderer::error_state`] and clears it with
/// [`crate::renderer::Renderer::clear_error_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorState {
    /// Nothing to report.
    #[default]
    NoError,
    /// Shutdown did not complete cleanly.
    ShutdownFailed,
    /// Initialization failed.
    InitFailure,
    /// A font could not be loaded or rasterized.
    FontLoadFailure,
}
