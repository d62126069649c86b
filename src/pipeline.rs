//! The owning pipeline and its teardown
//!
//! [`Pipeline`] holds every resource the presentation path acquires, from the
//! device file down to the frame on screen, and releases them in reverse order
//! of acquisition. Each resource sits in an `Option` so a partially built or
//! already shut down pipeline only releases what it still owns.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::drm_device::{Card, CrtcInfo, FramebufferId, KmsDevice};
use crate::egl::{EglConfig, EglContext, RenderContext};
use crate::error::{NegotiationError, PresentationError};
use crate::gbm_device::{BufferSurface, GbmAllocator, GbmSurface};
use crate::locator::{locate_output, OutputBinding};
use crate::negotiator::{negotiate_gbm_egl, Negotiated, SurfaceSpec};
use crate::presenter::FramePresenter;
use crate::Result;

/// Source of the device, allocator, surface and context a pipeline runs on.
pub trait DisplayBackend {
    type Device: KmsDevice;
    /// Kept alive until after the surface is gone
    type Allocator;
    type Surface: BufferSurface;
    type Context: RenderContext;

    fn open_device(&mut self, path: &Path) -> Result<Self::Device>;

    /// Build the render target. On error, everything created so far must
    /// already be released.
    fn negotiate(
        &mut self,
        device: &Self::Device,
        spec: &SurfaceSpec,
        attributes: &EglConfig,
    ) -> std::result::Result<
        Negotiated<Self::Allocator, Self::Surface, Self::Context>,
        NegotiationError,
    >;
}

/// DRM card + GBM + dynamically loaded EGL
#[derive(Debug, Default)]
pub struct GbmEglBackend;

impl DisplayBackend for GbmEglBackend {
    type Device = Card;
    type Allocator = GbmAllocator;
    type Surface = GbmSurface;
    type Context = EglContext;

    fn open_device(&mut self, path: &Path) -> Result<Card> {
        Card::open(path)
    }

    fn negotiate(
        &mut self,
        device: &Card,
        spec: &SurfaceSpec,
        attributes: &EglConfig,
    ) -> std::result::Result<Negotiated<GbmAllocator, GbmSurface, EglContext>, NegotiationError>
    {
        negotiate_gbm_egl(device, spec, attributes)
    }
}

type BufferOf<B> = <<B as DisplayBackend>::Surface as BufferSurface>::Buffer;

pub struct Pipeline<B: DisplayBackend> {
    presenter: Option<FramePresenter<BufferOf<B>>>,
    context: Option<B::Context>,
    surface: Option<B::Surface>,
    allocator: Option<B::Allocator>,
    saved_crtc: Option<CrtcInfo>,
    device: Option<B::Device>,
}

impl<B: DisplayBackend> Pipeline<B> {
    /// Open the device, locate an output and negotiate a render target for it.
    ///
    /// On failure, whatever was acquired has been released again by the time
    /// this returns.
    pub fn open(backend: &mut B, path: &Path, attributes: &EglConfig) -> Result<Self> {
        let device = backend.open_device(path)?;
        info!(path = %path.display(), "Opened display device");

        let located = locate_output(&device)?;
        let spec = SurfaceSpec::for_binding(&located.binding);
        let negotiated = backend.negotiate(&device, &spec, attributes)?;

        Ok(Self {
            presenter: Some(FramePresenter::new(located.binding)),
            context: Some(negotiated.context),
            surface: Some(negotiated.surface),
            allocator: Some(negotiated.allocator),
            saved_crtc: Some(located.saved_crtc),
            device: Some(device),
        })
    }

    pub fn binding(&self) -> Option<&OutputBinding> {
        self.presenter.as_ref().map(|p| p.binding())
    }

    pub fn presenter(&self) -> Option<&FramePresenter<BufferOf<B>>> {
        self.presenter.as_ref()
    }

    pub fn is_shut_down(&self) -> bool {
        self.device.is_none()
    }

    /// Put the frame rendered since the last call on screen.
    pub fn submit_frame(&mut self) -> std::result::Result<FramebufferId, PresentationError> {
        let (Some(device), Some(surface), Some(context), Some(presenter)) = (
            self.device.as_ref(),
            self.surface.as_ref(),
            self.context.as_ref(),
            self.presenter.as_mut(),
        ) else {
            return Err(PresentationError::ShutDown);
        };
        presenter.submit_frame(device, surface, context)
    }

    /// Restore the CRTC and release everything. Calling it again does nothing.
    pub fn shutdown(&mut self) {
        let Some(device) = self.device.as_ref() else {
            return;
        };
        info!("Shutting down display pipeline");

        if let Some(mut presenter) = self.presenter.take() {
            // Only touch the CRTC if we actually changed what it shows.
            if presenter.frame_count() > 0 {
                if let Some(saved) = self.saved_crtc.as_ref() {
                    restore_crtc(device, saved, presenter.binding());
                }
            }
            presenter.release(device);
        }
        self.saved_crtc = None;

        if self.context.take().is_some() {
            debug!("Released rendering context");
        }
        if self.surface.take().is_some() {
            debug!("Released render surface");
        }
        if self.allocator.take().is_some() {
            debug!("Released buffer allocator");
        }
        self.device = None;
        info!("Display pipeline shut down");
    }
}

/// Point the CRTC back at what it showed before the pipeline took it over.
fn restore_crtc<D: KmsDevice>(device: &D, saved: &CrtcInfo, binding: &OutputBinding) {
    let result = match saved.mode.as_ref() {
        Some(mode) => device.set_crtc(
            saved.id,
            saved.framebuffer,
            saved.position,
            &[binding.connector],
            Some(mode),
        ),
        // It was off before.
        None => device.set_crtc(saved.id, None, (0, 0), &[], None),
    };

    match result {
        Ok(()) => info!(crtc = %saved.id, "Restored CRTC"),
        Err(e) => warn!(crtc = %saved.id, "Failed to restore CRTC: {}", e),
    }
}

impl<B: DisplayBackend> Drop for Pipeline<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
