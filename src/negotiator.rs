//! Render target negotiation
//!
//! Builds, in order: GBM device on the card, EGL display on the GBM device,
//! one matching config, the GBM surface, the EGL window surface on it, and an
//! ES context made current on that surface.

use std::ffi::c_void;

use gbm::Format;
use tracing::info;

use crate::drm_device::Card;
use crate::egl::{self, EglConfig, EglContext, WindowContext, CONTEXT_CLIENT_VERSION};
use crate::error::NegotiationError;
use crate::gbm_device::{
    BufferSurface, GbmAllocator, GbmSurface, NativeWindow, SurfaceAllocator, SCANOUT_FORMAT,
};
use crate::locator::OutputBinding;

/// Size and pixel format of the buffer-object surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceSpec {
    pub width: u32,
    pub height: u32,
    pub format: Format,
}

impl SurfaceSpec {
    /// Full-screen opaque surface for the bound mode.
    pub fn for_binding(binding: &OutputBinding) -> Self {
        let (width, height) = binding.mode.size();
        Self {
            width,
            height,
            format: SCANOUT_FORMAT,
        }
    }
}

/// Everything negotiation produced. The owner must drop `context` before
/// `surface`, and `surface` before `allocator`.
pub struct Negotiated<A, S, C> {
    pub allocator: A,
    pub surface: S,
    pub context: C,
}

/// Bring up a rendering context on a surface from `allocator`.
///
/// `connect` turns the allocator's native display into an initialized,
/// API-bound context. On error everything created here is released, the
/// context before the surface and the surface before the allocator.
pub fn negotiate<A, C, F>(
    allocator: A,
    spec: &SurfaceSpec,
    attributes: &EglConfig,
    connect: F,
) -> Result<Negotiated<A, A::Surface, C>, NegotiationError>
where
    A: SurfaceAllocator,
    C: WindowContext,
    F: FnOnce(*mut c_void) -> Result<C, NegotiationError>,
{
    let mut context = connect(allocator.native_display())?;
    context.choose_config(attributes)?;

    // The window surface needs a live native window, so the GBM surface comes first.
    let surface = allocator
        .create_surface(spec)
        .map_err(NegotiationError::SurfaceCreationFailed)?;

    if let Err(e) = bind_context(&mut context, &surface, spec) {
        // Locals would drop the GBM surface before the EGL surface on it.
        drop(context);
        drop(surface);
        return Err(e);
    }

    info!(width = spec.width, height = spec.height, "Render target ready");
    Ok(Negotiated {
        allocator,
        surface,
        context,
    })
}

fn bind_context<C, S>(
    context: &mut C,
    surface: &S,
    spec: &SurfaceSpec,
) -> Result<(), NegotiationError>
where
    C: WindowContext,
    S: BufferSurface + NativeWindow,
{
    let expected = (spec.width, spec.height);
    let actual = surface.dimensions();
    if actual != expected {
        return Err(NegotiationError::SurfaceSizeMismatch { expected, actual });
    }

    context.create_window_surface(surface)?;
    context.create_context(CONTEXT_CLIENT_VERSION)?;
    context.make_current()
}

pub fn negotiate_gbm_egl(
    card: &Card,
    spec: &SurfaceSpec,
    attributes: &EglConfig,
) -> Result<Negotiated<GbmAllocator, GbmSurface, EglContext>, NegotiationError> {
    let allocator = GbmAllocator::new(card).map_err(NegotiationError::AllocatorCreationFailed)?;

    negotiate(allocator, spec, attributes, |native_display| {
        let instance = egl::load_library()?;
        EglContext::initialize(instance, native_display)
    })
}
