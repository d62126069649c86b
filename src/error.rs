//! Error types for the presentation pipeline
//!
//! Construction failures (discovery, negotiation, device I/O) are fatal for a
//! pipeline instance. Presentation failures are per-frame and recoverable.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::drm_device::{ConnectorId, CrtcId, EncoderId};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot use display device {}: {source}", path.display())]
    DeviceIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("display discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("render surface negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),

    #[error("presentation failed: {0}")]
    Presentation(#[from] PresentationError),

    #[error("cannot read configuration {}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration {}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// No usable connector -> encoder -> CRTC chain.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("no DRM resources found: {0}")]
    ResourcesUnavailable(#[source] io::Error),

    #[error("no connected DRM connector found")]
    NoConnectorFound,

    #[error("connector {0} advertises no modes")]
    NoModeFound(ConnectorId),

    #[error("no DRM encoder for connector {0}")]
    NoEncoderFound(ConnectorId),

    #[error("no DRM CRTC for encoder {0}")]
    NoCrtcFound(EncoderId),
}

#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("failed to load EGL: {0}")]
    LibraryLoadFailed(String),

    #[error("failed creating the GBM device: {0}")]
    AllocatorCreationFailed(#[source] io::Error),

    #[error("EGL display initialization failed: {0}")]
    DisplayInitFailed(String),

    #[error("no EGL config matches the requested attributes")]
    NoMatchingConfig,

    #[error("failed creating the GBM surface: {0}")]
    SurfaceCreationFailed(#[source] io::Error),

    #[error(
        "GBM surface is {}x{}, expected {}x{}",
        actual.0, actual.1, expected.0, expected.1
    )]
    SurfaceSizeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("failed creating the EGL window surface: {0}")]
    WindowSurfaceFailed(String),

    #[error("failed creating the EGL context: {0}")]
    ContextCreationFailed(String),

    #[error("failed making the EGL context current: {0}")]
    MakeCurrentFailed(String),
}

#[derive(Error, Debug)]
pub enum PresentationError {
    #[error("buffer swap failed: {0}")]
    SwapFailed(String),

    #[error("no front buffer after swap: {0}")]
    FrontBufferUnavailable(String),

    #[error("framebuffer creation failed: {0}")]
    FramebufferCreationFailed(#[source] io::Error),

    #[error("commit to CRTC {crtc} failed: {source}")]
    CrtcCommitFailed {
        crtc: CrtcId,
        #[source]
        source: io::Error,
    },

    #[error("pipeline has been shut down")]
    ShutDown,
}
