//! Kernel mode-setting device access
//!
//! The pipeline talks to the kernel through [`KmsDevice`], a narrow view of the
//! legacy (non-atomic) KMS API: resource enumeration, framebuffer add/remove and
//! CRTC commits. [`Card`] implements it on top of the `drm` crate.
//!
//! Object ids are kept as plain `u32` newtypes so that bindings can be copied,
//! logged and compared without holding on to kernel objects.

use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::num::NonZeroU32;
use std::os::unix::io::{AsFd, BorrowedFd};
use std::path::Path;
use std::rc::Rc;

use drm::control::{connector, Device as ControlDevice, Mode, RawResourceHandle};
use drm::Device as BasicDevice;
use tracing::{debug, info};

use crate::{Error, Result};

/// Colour depth and bits per pixel of every scan-out framebuffer.
pub const FRAMEBUFFER_DEPTH: u32 = 24;
pub const FRAMEBUFFER_BPP: u32 = 32;

/// Size of the kernel's mode name field, NUL terminator included when it fits
pub const DRM_DISPLAY_MODE_LEN: usize = 32;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

object_id!(
    /// A physical output port
    ConnectorId
);
object_id!(EncoderId);
object_id!(
    /// A scan-out engine
    CrtcId
);
object_id!(FramebufferId);

/// DRM mode info (matching kernel's drm_mode_modeinfo)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModeInfo {
    pub clock: u32,
    pub hdisplay: u16,
    pub hsync_start: u16,
    pub hsync_end: u16,
    pub htotal: u16,
    pub hskew: u16,
    pub vdisplay: u16,
    pub vsync_start: u16,
    pub vsync_end: u16,
    pub vtotal: u16,
    pub vscan: u16,
    pub vrefresh: u32,
    pub flags: u32,
    pub mode_type: u32,
    /// Raw name bytes as the kernel reported them
    pub name: [u8; DRM_DISPLAY_MODE_LEN],
}

impl ModeInfo {
    /// Active area in pixels
    pub fn size(&self) -> (u32, u32) {
        (u32::from(self.hdisplay), u32::from(self.vdisplay))
    }

    /// Name up to the first NUL, for display
    pub fn name(&self) -> Cow<'_, str> {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        String::from_utf8_lossy(&self.name[..len])
    }

    /// Replace the name, truncated to the field size.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = [0; DRM_DISPLAY_MODE_LEN];
        for (dst, src) in self.name.iter_mut().zip(name.bytes()) {
            *dst = src;
        }
        self
    }
}

impl fmt::Display for ModeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}", self.hdisplay, self.vdisplay, self.vrefresh)
    }
}

impl From<Mode> for ModeInfo {
    fn from(mode: Mode) -> Self {
        let raw: drm_ffi::drm_mode_modeinfo = mode.into();
        let name = raw.name.map(|c| c as u8);

        Self {
            clock: raw.clock,
            hdisplay: raw.hdisplay,
            hsync_start: raw.hsync_start,
            hsync_end: raw.hsync_end,
            htotal: raw.htotal,
            hskew: raw.hskew,
            vdisplay: raw.vdisplay,
            vsync_start: raw.vsync_start,
            vsync_end: raw.vsync_end,
            vtotal: raw.vtotal,
            vscan: raw.vscan,
            vrefresh: raw.vrefresh,
            flags: raw.flags,
            mode_type: raw.type_,
            name,
        }
    }
}

impl From<&ModeInfo> for Mode {
    fn from(info: &ModeInfo) -> Self {
        let name = info.name.map(|b| b as std::os::raw::c_char);

        Mode::from(drm_ffi::drm_mode_modeinfo {
            clock: info.clock,
            hdisplay: info.hdisplay,
            hsync_start: info.hsync_start,
            hsync_end: info.hsync_end,
            htotal: info.htotal,
            hskew: info.hskew,
            vdisplay: info.vdisplay,
            vsync_start: info.vsync_start,
            vsync_end: info.vsync_end,
            vtotal: info.vtotal,
            vscan: info.vscan,
            vrefresh: info.vrefresh,
            flags: info.flags,
            type_: info.mode_type,
            name,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Unknown,
}

/// DRM resources enumeration
#[derive(Debug, Clone, Default)]
pub struct DrmResources {
    pub connectors: Vec<ConnectorId>,
    pub encoders: Vec<EncoderId>,
    pub crtcs: Vec<CrtcId>,
}

/// DRM connector info
#[derive(Debug, Clone)]
pub struct ConnectorInfo {
    pub id: ConnectorId,
    pub name: String,
    pub state: ConnectionState,
    /// In the order the kernel reports them; the first is the preferred one.
    pub modes: Vec<ModeInfo>,
    pub encoder: Option<EncoderId>,
}

#[derive(Debug, Clone)]
pub struct EncoderInfo {
    pub id: EncoderId,
    pub crtc: Option<CrtcId>,
}

/// DRM CRTC info
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrtcInfo {
    pub id: CrtcId,
    pub framebuffer: Option<FramebufferId>,
    pub position: (u32, u32),
    pub mode: Option<ModeInfo>,
}

/// Parameters of a legacy `drmModeAddFB` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferRequest {
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub handle: u32,
    pub depth: u32,
    pub bpp: u32,
}

/// Kernel mode-setting operations used by the pipeline.
pub trait KmsDevice {
    fn resources(&self) -> io::Result<DrmResources>;

    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo>;

    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo>;

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo>;

    fn add_framebuffer(&self, request: &FramebufferRequest) -> io::Result<FramebufferId>;

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: Option<FramebufferId>,
        position: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()>;

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()>;
}

/// An open DRM device node.
///
/// Clones share the same file description, so GEM handles created through one
/// clone (e.g. by GBM) are valid for KMS calls on another. The descriptor is
/// closed when the last clone is dropped.
#[derive(Debug, Clone)]
pub struct Card(Rc<File>);

impl Card {
    /// Open a device node read-write and check that a DRM driver answers on it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::DeviceIo {
                path: path.to_owned(),
                source,
            })?;
        let card = Card(Rc::new(file));

        let driver = card.get_driver().map_err(|source| Error::DeviceIo {
            path: path.to_owned(),
            source,
        })?;
        info!(
            path = %path.display(),
            driver = %driver.name().to_string_lossy(),
            "Opened DRM device"
        );

        Ok(card)
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl BasicDevice for Card {}
impl ControlDevice for Card {}

fn handle<H: From<RawResourceHandle>>(raw: u32) -> io::Result<H> {
    NonZeroU32::new(raw)
        .map(H::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "null DRM object id"))
}

/// Borrowed view of a GEM buffer for `add_framebuffer`.
struct RawBuffer {
    request: FramebufferRequest,
    handle: drm::buffer::Handle,
}

impl drm::buffer::Buffer for RawBuffer {
    fn size(&self) -> (u32, u32) {
        (self.request.width, self.request.height)
    }

    fn format(&self) -> drm::buffer::DrmFourcc {
        drm::buffer::DrmFourcc::Xrgb8888
    }

    fn pitch(&self) -> u32 {
        self.request.pitch
    }

    fn handle(&self) -> drm::buffer::Handle {
        self.handle
    }
}

impl KmsDevice for Card {
    fn resources(&self) -> io::Result<DrmResources> {
        let handles = self.resource_handles()?;
        Ok(DrmResources {
            connectors: handles
                .connectors()
                .iter()
                .map(|&h| ConnectorId(h.into()))
                .collect(),
            encoders: handles
                .encoders()
                .iter()
                .map(|&h| EncoderId(h.into()))
                .collect(),
            crtcs: handles.crtcs().iter().map(|&h| CrtcId(h.into())).collect(),
        })
    }

    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo> {
        let info = self.get_connector(handle(id.0)?, false)?;
        let state = match info.state() {
            connector::State::Connected => ConnectionState::Connected,
            connector::State::Disconnected => ConnectionState::Disconnected,
            connector::State::Unknown => ConnectionState::Unknown,
        };

        Ok(ConnectorInfo {
            id,
            name: format!("{:?}-{}", info.interface(), info.interface_id()),
            state,
            modes: info.modes().iter().map(|&m| ModeInfo::from(m)).collect(),
            encoder: info.current_encoder().map(|h| EncoderId(h.into())),
        })
    }

    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo> {
        let info = self.get_encoder(handle(id.0)?)?;
        Ok(EncoderInfo {
            id,
            crtc: info.crtc().map(|h| CrtcId(h.into())),
        })
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        let info = self.get_crtc(handle(id.0)?)?;
        Ok(CrtcInfo {
            id,
            framebuffer: info.framebuffer().map(|h| FramebufferId(h.into())),
            position: info.position(),
            mode: info.mode().map(ModeInfo::from),
        })
    }

    fn add_framebuffer(&self, request: &FramebufferRequest) -> io::Result<FramebufferId> {
        let buffer = RawBuffer {
            request: *request,
            handle: handle(request.handle)?,
        };
        let fb = ControlDevice::add_framebuffer(self, &buffer, request.depth, request.bpp)?;
        debug!(
            fb = u32::from(fb),
            width = request.width,
            height = request.height,
            pitch = request.pitch,
            "Added framebuffer"
        );
        Ok(FramebufferId(fb.into()))
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: Option<FramebufferId>,
        position: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        let connectors = connectors
            .iter()
            .map(|c| handle::<connector::Handle>(c.0))
            .collect::<io::Result<Vec<_>>>()?;
        let framebuffer = framebuffer.map(|fb| handle(fb.0)).transpose()?;

        ControlDevice::set_crtc(
            self,
            handle(crtc.0)?,
            framebuffer,
            position,
            &connectors,
            mode.map(Mode::from),
        )
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        ControlDevice::destroy_framebuffer(self, handle(framebuffer.0)?)
    }
}
