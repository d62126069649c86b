//! GBM buffer-object device and surface
//!
//! The allocator is created on the same DRM file description used for mode
//! discovery, so buffer handles it hands out can be wrapped in KMS framebuffers.

use std::ffi::c_void;
use std::io;

use gbm::{AsRaw, BufferObject, BufferObjectFlags, Format};
use tracing::{debug, info};

use crate::drm_device::Card;
use crate::error::PresentationError;
use crate::negotiator::SurfaceSpec;

/// Pixel format of every scan-out surface: 32-bit, no alpha.
pub const SCANOUT_FORMAT: Format = Format::Xrgb8888;

/// A buffer object that can be wrapped in a KMS framebuffer.
pub trait ScanoutBuffer {
    /// GEM handle
    fn handle(&self) -> u32;

    /// Bytes per row
    fn pitch(&self) -> u32;
}

/// A surface whose front buffer can be locked after each swap.
///
/// Dropping a locked buffer releases it back to the surface.
pub trait BufferSurface {
    type Buffer: ScanoutBuffer;

    /// Lock the buffer that the last swap made current. Must only be called
    /// after a successful swap on the rendering surface bound to this surface.
    fn lock_front_buffer(&self) -> Result<Self::Buffer, PresentationError>;

    fn dimensions(&self) -> (u32, u32);
}

/// A native window EGL can create a window surface on.
///
/// # Safety
///
/// `native_window` must return a handle that is valid for
/// `eglCreateWindowSurface` for as long as `self` is alive.
pub unsafe trait NativeWindow {
    fn native_window(&self) -> *mut c_void;
}

/// A buffer-object device that hands out scan-out surfaces.
pub trait SurfaceAllocator {
    type Surface: BufferSurface + NativeWindow;

    /// Native display handle for `eglGetDisplay`
    fn native_display(&self) -> *mut c_void;

    /// Create a surface usable both for rendering and for scan-out.
    fn create_surface(&self, spec: &SurfaceSpec) -> io::Result<Self::Surface>;
}

impl<T: 'static> ScanoutBuffer for BufferObject<T> {
    fn handle(&self) -> u32 {
        drm::buffer::Buffer::handle(self).into()
    }

    fn pitch(&self) -> u32 {
        drm::buffer::Buffer::pitch(self)
    }
}

/// GBM device on a DRM card
pub struct GbmAllocator {
    device: gbm::Device<Card>,
}

impl GbmAllocator {
    pub fn new(card: &Card) -> io::Result<Self> {
        let device = gbm::Device::new(card.clone())?;
        info!(backend = %device.backend_name(), "Created GBM device");
        Ok(Self { device })
    }
}

impl SurfaceAllocator for GbmAllocator {
    type Surface = GbmSurface;

    fn native_display(&self) -> *mut c_void {
        self.device.as_raw() as *mut _
    }

    fn create_surface(&self, spec: &SurfaceSpec) -> io::Result<GbmSurface> {
        let surface = self.device.create_surface::<()>(
            spec.width,
            spec.height,
            spec.format,
            BufferObjectFlags::SCANOUT | BufferObjectFlags::RENDERING,
        )?;
        info!(
            width = spec.width,
            height = spec.height,
            format = ?spec.format,
            "Created GBM surface"
        );

        Ok(GbmSurface {
            surface,
            width: spec.width,
            height: spec.height,
        })
    }
}

impl Drop for GbmAllocator {
    fn drop(&mut self) {
        debug!("Destroying GBM device");
    }
}

/// Buffer-object surface sized to the output mode
pub struct GbmSurface {
    surface: gbm::Surface<()>,
    width: u32,
    height: u32,
}

// SAFETY: the `gbm_surface` pointer lives as long as the wrapping `gbm::Surface`.
unsafe impl NativeWindow for GbmSurface {
    fn native_window(&self) -> *mut c_void {
        self.surface.as_raw() as *mut _
    }
}

impl BufferSurface for GbmSurface {
    type Buffer = BufferObject<()>;

    fn lock_front_buffer(&self) -> Result<Self::Buffer, PresentationError> {
        // SAFETY: the presenter only locks after `eglSwapBuffers` succeeded on
        // the window surface created from this GBM surface.
        unsafe { self.surface.lock_front_buffer() }
            .map_err(|e| PresentationError::FrontBufferUnavailable(e.to_string()))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for GbmSurface {
    fn drop(&mut self) {
        debug!("Destroying GBM surface");
    }
}
