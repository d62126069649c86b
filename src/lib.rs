//! Windowless OpenGL ES presentation over DRM/KMS
//!
//! Drives a display directly from a DRM card node: finds a connected output,
//! renders into a GBM surface through an EGL context, and flips each finished
//! buffer onto the CRTC with classic double buffering.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Application rendering (GLES 3)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     draw, then submit_frame
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Pipeline (owns everything, tears down in reverse order)    │
//! │  ┌─────────────┐  ┌─────────────────────┐  ┌─────────────┐  │
//! │  │  Locator    │  │ Negotiator          │  │ Presenter   │  │
//! │  │ conn/enc/   │  │ GBM surface +       │  │ swap, lock, │  │
//! │  │ crtc/mode   │  │ EGL context         │  │ addfb, set  │  │
//! │  └─────────────┘  └─────────────────────┘  └─────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               libdrm ioctls / libgbm / libEGL
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 /dev/dri/cardN (KMS driver)                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use kms_presenter::{EglConfig, GbmEglBackend, Pipeline};
//!
//! let mut pipeline = Pipeline::open(
//!     &mut GbmEglBackend,
//!     Path::new("/dev/dri/card1"),
//!     &EglConfig::default(),
//! )?;
//! loop {
//!     // draw with GLES...
//!     pipeline.submit_frame()?;
//! }
//! ```

pub mod config;
pub mod drm_device;
pub mod egl;
pub mod error;
pub mod gbm_device;
pub mod gl;
pub mod locator;
pub mod negotiator;
pub mod pipeline;
pub mod presenter;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use drm_device::{Card, KmsDevice};
pub use egl::EglConfig;
pub use error::{DiscoveryError, Error, NegotiationError, PresentationError};
pub use locator::{locate_output, OutputBinding};
pub use pipeline::{DisplayBackend, GbmEglBackend, Pipeline};

/// Result type for this crate
pub type Result<T> = std::result::Result<T, Error>;
