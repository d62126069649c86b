//! Recording fakes for the KMS, GBM and EGL seams
//!
//! Every fake writes into one shared [`Log`] so tests can assert on the global
//! order of kernel calls, buffer locks/releases and teardown steps.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use crate::drm_device::{
    ConnectionState, ConnectorId, ConnectorInfo, CrtcId, CrtcInfo, DrmResources, EncoderId,
    EncoderInfo, FramebufferId, FramebufferRequest, KmsDevice, ModeInfo,
};
use crate::egl::{EglConfig, RenderContext, WindowContext};
use crate::error::{NegotiationError, PresentationError};
use crate::gbm_device::{BufferSurface, NativeWindow, ScanoutBuffer, SurfaceAllocator};
use crate::negotiator::{negotiate, Negotiated, SurfaceSpec};
use crate::pipeline::DisplayBackend;
use crate::{Error, Result};

pub fn mode(width: u16, height: u16) -> ModeInfo {
    ModeInfo {
        hdisplay: width,
        vdisplay: height,
        htotal: width + 160,
        vtotal: height + 45,
        vrefresh: 60,
        ..Default::default()
    }
    .with_name(&format!("{}x{}", width, height))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Resources,
    Connector(u32),
    Encoder(u32),
    Crtc(u32),
    AddFramebuffer {
        fb: u32,
        request: FramebufferRequest,
    },
    SetCrtc {
        crtc: u32,
        fb: Option<u32>,
        position: (u32, u32),
        connectors: Vec<u32>,
        mode: Option<ModeInfo>,
    },
    DestroyFramebuffer(u32),
    Swap,
    Lock(u32),
    Release(u32),
    OpenDevice(PathBuf),
    CloseDevice,
    CreateAllocator,
    DestroyAllocator,
    CreateSurface {
        width: u32,
        height: u32,
    },
    DestroySurface,
    InitializeDisplay,
    ChooseConfig,
    CreateWindowSurface,
    CreateContext,
    MakeCurrent,
    TerminateDisplay,
}

#[derive(Debug, Clone, Default)]
pub struct Log(Rc<RefCell<Vec<Call>>>);

impl Log {
    pub fn push(&self, call: Call) {
        self.0.borrow_mut().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

#[derive(Default)]
struct KmsState {
    connectors: Vec<(ConnectorId, Option<ConnectorInfo>)>,
    encoders: HashMap<EncoderId, EncoderInfo>,
    crtcs: HashMap<CrtcId, CrtcInfo>,
}

pub struct FakeKms {
    log: Log,
    state: RefCell<KmsState>,
    next_fb: Cell<u32>,
    fail_resources: Cell<bool>,
    fail_framebuffer: Cell<bool>,
    fail_commit: Cell<bool>,
    fail_destroy: Cell<bool>,
}

impl FakeKms {
    pub fn new() -> Self {
        Self::with_log(Log::default())
    }

    pub fn with_log(log: Log) -> Self {
        Self {
            log,
            state: RefCell::default(),
            next_fb: Cell::new(100),
            fail_resources: Cell::new(false),
            fail_framebuffer: Cell::new(false),
            fail_commit: Cell::new(false),
            fail_destroy: Cell::new(false),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.log.calls()
    }

    pub fn add_connector(
        &self,
        id: u32,
        state: ConnectionState,
        modes: Vec<ModeInfo>,
        encoder: Option<u32>,
    ) {
        let info = ConnectorInfo {
            id: ConnectorId(id),
            name: format!("HDMI-A-{}", id),
            state,
            modes,
            encoder: encoder.map(EncoderId),
        };
        self.state
            .borrow_mut()
            .connectors
            .push((ConnectorId(id), Some(info)));
    }

    /// A connector id that is enumerated but cannot be queried
    pub fn add_missing_connector(&self, id: u32) {
        self.state
            .borrow_mut()
            .connectors
            .push((ConnectorId(id), None));
    }

    pub fn add_encoder(&self, id: u32, crtc: Option<u32>) {
        self.state.borrow_mut().encoders.insert(
            EncoderId(id),
            EncoderInfo {
                id: EncoderId(id),
                crtc: crtc.map(CrtcId),
            },
        );
    }

    pub fn add_crtc(&self, id: u32, framebuffer: Option<u32>, mode: Option<ModeInfo>) {
        self.state.borrow_mut().crtcs.insert(
            CrtcId(id),
            CrtcInfo {
                id: CrtcId(id),
                framebuffer: framebuffer.map(FramebufferId),
                position: (0, 0),
                mode,
            },
        );
    }

    /// One connected 1920x1080 output on connector 2, encoder 6, CRTC 11
    pub fn single_output(log: Log) -> Self {
        let kms = Self::with_log(log);
        kms.add_connector(1, ConnectionState::Disconnected, vec![], None);
        kms.add_connector(
            2,
            ConnectionState::Connected,
            vec![mode(1920, 1080), mode(1280, 720)],
            Some(6),
        );
        kms.add_encoder(6, Some(11));
        kms.add_crtc(11, Some(40), Some(mode(1280, 720)));
        kms
    }

    pub fn fail_resources(&self) {
        self.fail_resources.set(true);
    }

    pub fn fail_next_framebuffer(&self) {
        self.fail_framebuffer.set(true);
    }

    pub fn fail_next_commit(&self) {
        self.fail_commit.set(true);
    }

    pub fn fail_next_destroy(&self) {
        self.fail_destroy.set(true);
    }
}

fn not_found() -> io::Error {
    io::Error::from_raw_os_error(libc::ENOENT)
}

impl KmsDevice for FakeKms {
    fn resources(&self) -> io::Result<DrmResources> {
        self.log.push(Call::Resources);
        if self.fail_resources.get() {
            return Err(io::Error::from_raw_os_error(libc::EACCES));
        }
        let state = self.state.borrow();
        Ok(DrmResources {
            connectors: state.connectors.iter().map(|(id, _)| *id).collect(),
            encoders: state.encoders.keys().copied().collect(),
            crtcs: state.crtcs.keys().copied().collect(),
        })
    }

    fn connector(&self, id: ConnectorId) -> io::Result<ConnectorInfo> {
        self.log.push(Call::Connector(id.0));
        self.state
            .borrow()
            .connectors
            .iter()
            .find(|(c, _)| *c == id)
            .and_then(|(_, info)| info.clone())
            .ok_or_else(not_found)
    }

    fn encoder(&self, id: EncoderId) -> io::Result<EncoderInfo> {
        self.log.push(Call::Encoder(id.0));
        self.state
            .borrow()
            .encoders
            .get(&id)
            .cloned()
            .ok_or_else(not_found)
    }

    fn crtc(&self, id: CrtcId) -> io::Result<CrtcInfo> {
        self.log.push(Call::Crtc(id.0));
        self.state
            .borrow()
            .crtcs
            .get(&id)
            .cloned()
            .ok_or_else(not_found)
    }

    fn add_framebuffer(&self, request: &FramebufferRequest) -> io::Result<FramebufferId> {
        if self.fail_framebuffer.replace(false) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let fb = self.next_fb.get();
        self.next_fb.set(fb + 1);
        self.log.push(Call::AddFramebuffer {
            fb,
            request: *request,
        });
        Ok(FramebufferId(fb))
    }

    fn set_crtc(
        &self,
        crtc: CrtcId,
        framebuffer: Option<FramebufferId>,
        position: (u32, u32),
        connectors: &[ConnectorId],
        mode: Option<&ModeInfo>,
    ) -> io::Result<()> {
        if self.fail_commit.replace(false) {
            return Err(io::Error::from_raw_os_error(libc::EBUSY));
        }
        self.log.push(Call::SetCrtc {
            crtc: crtc.0,
            fb: framebuffer.map(|fb| fb.0),
            position,
            connectors: connectors.iter().map(|c| c.0).collect(),
            mode: mode.cloned(),
        });
        Ok(())
    }

    fn destroy_framebuffer(&self, framebuffer: FramebufferId) -> io::Result<()> {
        self.log.push(Call::DestroyFramebuffer(framebuffer.0));
        if self.fail_destroy.replace(false) {
            return Err(io::Error::from_raw_os_error(libc::ENOENT));
        }
        Ok(())
    }
}

impl Drop for FakeKms {
    fn drop(&mut self) {
        self.log.push(Call::CloseDevice);
    }
}

#[derive(Debug)]
pub struct FakeBuffer {
    pub handle: u32,
    pub pitch: u32,
    log: Log,
}

impl ScanoutBuffer for FakeBuffer {
    fn handle(&self) -> u32 {
        self.handle
    }

    fn pitch(&self) -> u32 {
        self.pitch
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.log.push(Call::Release(self.handle));
    }
}

pub struct FakeSurface {
    log: Log,
    width: u32,
    height: u32,
    next_handle: Cell<u32>,
    pub fail_lock: Cell<bool>,
}

impl FakeSurface {
    pub fn new(log: Log, width: u32, height: u32) -> Self {
        Self {
            log,
            width,
            height,
            next_handle: Cell::new(1),
            fail_lock: Cell::new(false),
        }
    }
}

impl BufferSurface for FakeSurface {
    type Buffer = FakeBuffer;

    fn lock_front_buffer(&self) -> std::result::Result<FakeBuffer, PresentationError> {
        if self.fail_lock.get() {
            return Err(PresentationError::FrontBufferUnavailable(
                "no free buffers".into(),
            ));
        }
        let handle = self.next_handle.get();
        self.next_handle.set(handle + 1);
        self.log.push(Call::Lock(handle));
        Ok(FakeBuffer {
            handle,
            pitch: self.width * 4,
            log: self.log.clone(),
        })
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

pub struct FakeContext {
    log: Log,
    pub fail_swap: Cell<bool>,
}

impl FakeContext {
    pub fn new(log: Log) -> Self {
        Self {
            log,
            fail_swap: Cell::new(false),
        }
    }
}

impl RenderContext for FakeContext {
    fn swap_buffers(&self) -> std::result::Result<(), PresentationError> {
        if self.fail_swap.get() {
            return Err(PresentationError::SwapFailed("EGL_BAD_SURFACE".into()));
        }
        self.log.push(Call::Swap);
        Ok(())
    }
}

/// Stands in for the GBM device.
pub struct FakeAllocator {
    log: Log,
    pub fail_surface: Cell<bool>,
    /// Hand out surfaces of this size instead of the requested one
    pub surface_size: Cell<Option<(u32, u32)>>,
}

impl FakeAllocator {
    pub fn new(log: Log) -> Self {
        log.push(Call::CreateAllocator);
        Self {
            log,
            fail_surface: Cell::new(false),
            surface_size: Cell::new(None),
        }
    }
}

impl SurfaceAllocator for FakeAllocator {
    type Surface = TrackedSurface;

    fn native_display(&self) -> *mut c_void {
        std::ptr::null_mut()
    }

    fn create_surface(&self, spec: &SurfaceSpec) -> io::Result<TrackedSurface> {
        if self.fail_surface.get() {
            return Err(io::Error::from_raw_os_error(libc::ENOMEM));
        }
        let (width, height) = self
            .surface_size
            .get()
            .unwrap_or((spec.width, spec.height));
        self.log.push(Call::CreateSurface { width, height });
        Ok(TrackedSurface {
            inner: FakeSurface::new(self.log.clone(), width, height),
        })
    }
}

impl Drop for FakeAllocator {
    fn drop(&mut self) {
        self.log.push(Call::DestroyAllocator);
    }
}

/// Surface plus a destruction marker
pub struct TrackedSurface {
    inner: FakeSurface,
}

impl BufferSurface for TrackedSurface {
    type Buffer = FakeBuffer;

    fn lock_front_buffer(&self) -> std::result::Result<FakeBuffer, PresentationError> {
        self.inner.lock_front_buffer()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.inner.dimensions()
    }
}

// SAFETY: the fake EGL never dereferences the handle.
unsafe impl NativeWindow for TrackedSurface {
    fn native_window(&self) -> *mut c_void {
        std::ptr::null_mut()
    }
}

impl Drop for TrackedSurface {
    fn drop(&mut self) {
        self.inner.log.push(Call::DestroySurface);
    }
}

/// Negotiation step that should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Allocator,
    Display,
    Config,
    Surface,
    WindowSurface,
    Context,
    MakeCurrent,
}

/// EGL stand-in. Each successful step is logged; dropping it logs
/// `TerminateDisplay`, which covers the window surface and context too.
pub struct FakeEgl {
    inner: FakeContext,
    fail_at: Option<FailAt>,
}

impl FakeEgl {
    pub fn connect(
        log: Log,
        fail_at: Option<FailAt>,
    ) -> std::result::Result<Self, NegotiationError> {
        if fail_at == Some(FailAt::Display) {
            return Err(NegotiationError::DisplayInitFailed("EGL_NOT_INITIALIZED".into()));
        }
        log.push(Call::InitializeDisplay);
        Ok(Self {
            inner: FakeContext::new(log),
            fail_at,
        })
    }

    fn step(
        &self,
        step: FailAt,
        call: Call,
        err: impl FnOnce() -> NegotiationError,
    ) -> std::result::Result<(), NegotiationError> {
        if self.fail_at == Some(step) {
            return Err(err());
        }
        self.inner.log.push(call);
        Ok(())
    }
}

impl RenderContext for FakeEgl {
    fn swap_buffers(&self) -> std::result::Result<(), PresentationError> {
        self.inner.swap_buffers()
    }
}

impl WindowContext for FakeEgl {
    fn choose_config(
        &mut self,
        _attributes: &EglConfig,
    ) -> std::result::Result<(), NegotiationError> {
        self.step(FailAt::Config, Call::ChooseConfig, || {
            NegotiationError::NoMatchingConfig
        })
    }

    fn create_window_surface<W: NativeWindow>(
        &mut self,
        _window: &W,
    ) -> std::result::Result<(), NegotiationError> {
        self.step(FailAt::WindowSurface, Call::CreateWindowSurface, || {
            NegotiationError::WindowSurfaceFailed("EGL_BAD_NATIVE_WINDOW".into())
        })
    }

    fn create_context(
        &mut self,
        _client_version: i32,
    ) -> std::result::Result<(), NegotiationError> {
        self.step(FailAt::Context, Call::CreateContext, || {
            NegotiationError::ContextCreationFailed("EGL_BAD_MATCH".into())
        })
    }

    fn make_current(&self) -> std::result::Result<(), NegotiationError> {
        self.step(FailAt::MakeCurrent, Call::MakeCurrent, || {
            NegotiationError::MakeCurrentFailed("EGL_BAD_ACCESS".into())
        })
    }
}

impl Drop for FakeEgl {
    fn drop(&mut self) {
        self.inner.log.push(Call::TerminateDisplay);
    }
}

pub struct FakeBackend {
    log: Log,
    kms: Option<FakeKms>,
    pub fail_at: Option<FailAt>,
    pub last_spec: Option<SurfaceSpec>,
    pub last_attributes: Option<EglConfig>,
}

impl FakeBackend {
    pub fn new(log: Log, kms: FakeKms) -> Self {
        Self {
            log,
            kms: Some(kms),
            fail_at: None,
            last_spec: None,
            last_attributes: None,
        }
    }

    /// A backend whose device cannot be opened
    pub fn without_device(log: Log) -> Self {
        Self {
            log,
            kms: None,
            fail_at: None,
            last_spec: None,
            last_attributes: None,
        }
    }
}

impl DisplayBackend for FakeBackend {
    type Device = FakeKms;
    type Allocator = FakeAllocator;
    type Surface = TrackedSurface;
    type Context = FakeEgl;

    fn open_device(&mut self, path: &Path) -> Result<FakeKms> {
        match self.kms.take() {
            Some(kms) => {
                self.log.push(Call::OpenDevice(path.to_owned()));
                Ok(kms)
            }
            None => Err(Error::DeviceIo {
                path: path.to_owned(),
                source: io::Error::from_raw_os_error(libc::ENOENT),
            }),
        }
    }

    fn negotiate(
        &mut self,
        _device: &FakeKms,
        spec: &SurfaceSpec,
        attributes: &EglConfig,
    ) -> std::result::Result<
        Negotiated<FakeAllocator, TrackedSurface, FakeEgl>,
        NegotiationError,
    > {
        self.last_spec = Some(*spec);
        self.last_attributes = Some(attributes.clone());

        if self.fail_at == Some(FailAt::Allocator) {
            return Err(NegotiationError::AllocatorCreationFailed(
                io::Error::from_raw_os_error(libc::ENODEV),
            ));
        }
        let allocator = FakeAllocator::new(self.log.clone());
        allocator
            .fail_surface
            .set(self.fail_at == Some(FailAt::Surface));

        let log = self.log.clone();
        let fail_at = self.fail_at;
        negotiate(allocator, spec, attributes, |_| FakeEgl::connect(log, fail_at))
    }
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Run `f` with every tracing event on this thread formatted into a string.
pub fn capture_logs(f: impl FnOnce()) -> String {
    let buffer = Arc::new(Mutex::new(Vec::new()));
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || CaptureWriter(writer.clone()))
        .finish();

    tracing::subscriber::with_default(subscriber, f);

    let bytes = buffer.lock().unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}
