//! Double-buffered frame presentation
//!
//! Each submitted frame goes through swap -> lock front buffer -> add
//! framebuffer -> commit to the CRTC. The previously presented frame is retired
//! only once the new framebuffer has been committed, so the CRTC never scans
//! out a buffer that has been handed back to the surface.

use tracing::{debug, trace, warn};

use crate::drm_device::{
    FramebufferId, FramebufferRequest, KmsDevice, FRAMEBUFFER_BPP, FRAMEBUFFER_DEPTH,
};
use crate::egl::RenderContext;
use crate::error::PresentationError;
use crate::gbm_device::{BufferSurface, ScanoutBuffer};
use crate::locator::OutputBinding;

/// A buffer object and the framebuffer wrapping it, released together.
#[derive(Debug)]
pub struct PresentedFrame<B> {
    buffer: B,
    framebuffer: FramebufferId,
}

impl<B> PresentedFrame<B> {
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn buffer(&self) -> &B {
        &self.buffer
    }

    /// Remove the framebuffer from the kernel, then release the buffer object.
    ///
    /// The buffer is released even if the kernel refuses the removal.
    pub fn retire<D: KmsDevice>(self, device: &D) {
        if let Err(e) = device.destroy_framebuffer(self.framebuffer) {
            warn!(fb = %self.framebuffer, "Failed to remove framebuffer: {}", e);
        }
        trace!(fb = %self.framebuffer, "Retired frame");
        drop(self.buffer);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    /// Nothing has been presented yet
    Idle,
    /// Inside `submit_frame`
    FramePending,
    /// A frame is on screen
    Presented,
}

pub struct FramePresenter<B> {
    binding: OutputBinding,
    phase: FramePhase,
    presented: Option<PresentedFrame<B>>,
    frames: u64,
}

impl<B: ScanoutBuffer> FramePresenter<B> {
    pub fn new(binding: OutputBinding) -> Self {
        Self {
            binding,
            phase: FramePhase::Idle,
            presented: None,
            frames: 0,
        }
    }

    pub fn binding(&self) -> &OutputBinding {
        &self.binding
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// The frame currently scanned out
    pub fn presented(&self) -> Option<&PresentedFrame<B>> {
        self.presented.as_ref()
    }

    /// Number of frames successfully committed
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    /// Present whatever has been rendered into `context` since the last call.
    ///
    /// Blocks until the GPU hands over the front buffer. On error the frame
    /// that was on screen stays there and nothing created by this call leaks.
    pub fn submit_frame<D, S, R>(
        &mut self,
        device: &D,
        surface: &S,
        context: &R,
    ) -> Result<FramebufferId, PresentationError>
    where
        D: KmsDevice,
        S: BufferSurface<Buffer = B>,
        R: RenderContext,
    {
        self.phase = FramePhase::FramePending;
        let result = self.present(device, surface, context);
        self.phase = if self.presented.is_some() {
            FramePhase::Presented
        } else {
            FramePhase::Idle
        };
        result
    }

    fn present<D, S, R>(
        &mut self,
        device: &D,
        surface: &S,
        context: &R,
    ) -> Result<FramebufferId, PresentationError>
    where
        D: KmsDevice,
        S: BufferSurface<Buffer = B>,
        R: RenderContext,
    {
        context.swap_buffers()?;
        let buffer = surface.lock_front_buffer()?;

        let (width, height) = self.binding.mode.size();
        let request = FramebufferRequest {
            width,
            height,
            pitch: buffer.pitch(),
            handle: buffer.handle(),
            depth: FRAMEBUFFER_DEPTH,
            bpp: FRAMEBUFFER_BPP,
        };
        // On failure `buffer` is dropped here, releasing it to the surface.
        let framebuffer = device
            .add_framebuffer(&request)
            .map_err(PresentationError::FramebufferCreationFailed)?;
        let frame = PresentedFrame {
            buffer,
            framebuffer,
        };

        if let Err(source) = device.set_crtc(
            self.binding.crtc,
            Some(framebuffer),
            (0, 0),
            &[self.binding.connector],
            Some(&self.binding.mode),
        ) {
            frame.retire(device);
            return Err(PresentationError::CrtcCommitFailed {
                crtc: self.binding.crtc,
                source,
            });
        }

        // The new frame is on screen; only now may the old one go.
        if let Some(previous) = self.presented.replace(frame) {
            previous.retire(device);
        }
        self.frames += 1;
        debug!(fb = %framebuffer, frame = self.frames, "Presented frame");

        Ok(framebuffer)
    }

    /// Retire the presented frame, if any.
    ///
    /// The caller must have pointed the CRTC elsewhere first.
    pub fn release<D: KmsDevice>(&mut self, device: &D) {
        if let Some(frame) = self.presented.take() {
            frame.retire(device);
        }
        self.phase = FramePhase::Idle;
    }
}
