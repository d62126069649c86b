//! EGL rendering context on top of a GBM surface
//!
//! EGL is loaded at runtime through `khronos-egl`, so opening a device and
//! discovering outputs works on machines without a GL stack installed.

use std::rc::Rc;

use khronos_egl as egl;
use tracing::{debug, info, warn};

use crate::error::{NegotiationError, PresentationError};
use crate::gbm_device::{NativeWindow, SCANOUT_FORMAT};

/// EGL library handle shared by every object created from it
pub type EglInstance = egl::DynamicInstance<egl::EGL1_4>;

/// Client version requested for the context.
pub const CONTEXT_CLIENT_VERSION: egl::Int = 3;

/// EGL configuration attributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EglConfig {
    pub red_size: egl::Int,
    pub green_size: egl::Int,
    pub blue_size: egl::Int,
    pub alpha_size: egl::Int,
    pub depth_size: Option<egl::Int>,
    pub stencil_size: Option<egl::Int>,
}

impl Default for EglConfig {
    /// Opaque 8-bit RGB, matching the XRGB8888 scan-out format.
    fn default() -> Self {
        Self {
            red_size: 8,
            green_size: 8,
            blue_size: 8,
            alpha_size: 0,
            depth_size: None,
            stencil_size: None,
        }
    }
}

impl EglConfig {
    /// NONE-terminated attribute list for `eglChooseConfig`
    pub fn attrib_list(&self) -> Vec<egl::Int> {
        let mut attribs = vec![
            egl::SURFACE_TYPE,
            egl::WINDOW_BIT,
            egl::RED_SIZE,
            self.red_size,
            egl::GREEN_SIZE,
            self.green_size,
            egl::BLUE_SIZE,
            self.blue_size,
            egl::ALPHA_SIZE,
            self.alpha_size,
        ];
        if let Some(depth) = self.depth_size {
            attribs.extend([egl::DEPTH_SIZE, depth]);
        }
        if let Some(stencil) = self.stencil_size {
            attribs.extend([egl::STENCIL_SIZE, stencil]);
        }
        attribs.extend([egl::RENDERABLE_TYPE, egl::OPENGL_ES2_BIT, egl::NONE]);
        attribs
    }
}

/// Something that can publish the frame rendered into it.
pub trait RenderContext {
    fn swap_buffers(&self) -> Result<(), PresentationError>;
}

/// EGL setup on a native window, one step at a time.
///
/// Dropping the implementor releases whatever the steps created.
pub trait WindowContext: RenderContext {
    /// Request exactly one config matching `attributes`.
    fn choose_config(&mut self, attributes: &EglConfig) -> Result<(), NegotiationError>;

    /// Create the window surface on an existing native window.
    fn create_window_surface<W: NativeWindow>(
        &mut self,
        window: &W,
    ) -> Result<(), NegotiationError>;

    fn create_context(&mut self, client_version: egl::Int) -> Result<(), NegotiationError>;

    fn make_current(&self) -> Result<(), NegotiationError>;
}

pub fn load_library() -> Result<Rc<EglInstance>, NegotiationError> {
    let instance = unsafe { EglInstance::load_required() }
        .map_err(|e| NegotiationError::LibraryLoadFailed(format!("{:?}", e)))?;
    debug!("Loaded EGL library");
    Ok(Rc::new(instance))
}

/// EGL display, config, window surface and context bound to one GBM surface.
///
/// Built step by step; dropping it releases whatever was created so far, in the
/// order surface, context, display.
pub struct EglContext {
    instance: Rc<EglInstance>,
    display: egl::Display,
    config: Option<egl::Config>,
    surface: Option<egl::Surface>,
    context: Option<egl::Context>,
}

impl EglContext {
    /// Get and initialize a display for a native (GBM) display handle and
    /// bind the OpenGL ES API.
    pub fn initialize(
        instance: Rc<EglInstance>,
        native_display: egl::NativeDisplayType,
    ) -> Result<Self, NegotiationError> {
        let display = unsafe { instance.get_display(native_display) }
            .ok_or_else(|| NegotiationError::DisplayInitFailed("no EGL display".into()))?;

        // Nothing to release until the display is initialized.
        let (major, minor) = instance
            .initialize(display)
            .map_err(|e| NegotiationError::DisplayInitFailed(e.to_string()))?;

        let this = Self {
            instance,
            display,
            config: None,
            surface: None,
            context: None,
        };
        this.instance
            .bind_api(egl::OPENGL_ES_API)
            .map_err(|e| NegotiationError::DisplayInitFailed(e.to_string()))?;

        let vendor = this
            .instance
            .query_string(Some(display), egl::VENDOR)
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!(major, minor, %vendor, "EGL initialized");

        Ok(this)
    }
}

impl RenderContext for EglContext {
    fn swap_buffers(&self) -> Result<(), PresentationError> {
        let surface = self
            .surface
            .ok_or_else(|| PresentationError::SwapFailed("no window surface".into()))?;
        self.instance
            .swap_buffers(self.display, surface)
            .map_err(|e| PresentationError::SwapFailed(e.to_string()))
    }
}

impl WindowContext for EglContext {
    fn choose_config(&mut self, attributes: &EglConfig) -> Result<(), NegotiationError> {
        let config = self
            .instance
            .choose_first_config(self.display, &attributes.attrib_list())
            .map_err(|_| NegotiationError::NoMatchingConfig)?
            .ok_or(NegotiationError::NoMatchingConfig)?;

        match self
            .instance
            .get_config_attrib(self.display, config, egl::NATIVE_VISUAL_ID)
        {
            Ok(visual) if visual as u32 == SCANOUT_FORMAT as u32 => {
                debug!(visual = format_args!("{:#x}", visual), "Chose EGL config");
            }
            Ok(visual) => warn!(
                visual = format_args!("{:#x}", visual),
                "EGL config visual does not match the scan-out format"
            ),
            Err(e) => debug!("EGL config has no native visual: {}", e),
        }

        self.config = Some(config);
        Ok(())
    }

    fn create_window_surface<W: NativeWindow>(
        &mut self,
        window: &W,
    ) -> Result<(), NegotiationError> {
        let config = self
            .config
            .ok_or_else(|| NegotiationError::WindowSurfaceFailed("no config chosen".into()))?;

        let surface = unsafe {
            self.instance.create_window_surface(
                self.display,
                config,
                window.native_window() as egl::NativeWindowType,
                None,
            )
        }
        .map_err(|e| NegotiationError::WindowSurfaceFailed(e.to_string()))?;

        debug!("Created EGL window surface");
        self.surface = Some(surface);
        Ok(())
    }

    fn create_context(&mut self, client_version: egl::Int) -> Result<(), NegotiationError> {
        let config = self
            .config
            .ok_or_else(|| NegotiationError::ContextCreationFailed("no config chosen".into()))?;
        let attribs = [egl::CONTEXT_CLIENT_VERSION, client_version, egl::NONE];

        let context = self
            .instance
            .create_context(self.display, config, None, &attribs)
            .map_err(|e| NegotiationError::ContextCreationFailed(e.to_string()))?;

        debug!(client_version, "Created EGL context");
        self.context = Some(context);
        Ok(())
    }

    fn make_current(&self) -> Result<(), NegotiationError> {
        let (Some(surface), Some(context)) = (self.surface, self.context) else {
            return Err(NegotiationError::MakeCurrentFailed(
                "surface or context missing".into(),
            ));
        };

        self.instance
            .make_current(self.display, Some(surface), Some(surface), Some(context))
            .map_err(|e| NegotiationError::MakeCurrentFailed(e.to_string()))?;

        info!("EGL context is current");
        Ok(())
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        info!("Releasing EGL resources");

        if let Err(e) = self.instance.make_current(self.display, None, None, None) {
            warn!("Failed to release EGL context: {:?}", e);
        }

        if let Some(surface) = self.surface.take() {
            if let Err(e) = self.instance.destroy_surface(self.display, surface) {
                warn!("Failed to destroy EGL surface: {:?}", e);
            }
        }
        if let Some(context) = self.context.take() {
            if let Err(e) = self.instance.destroy_context(self.display, context) {
                warn!("Failed to destroy EGL context: {:?}", e);
            }
        }
        if let Err(e) = self.instance.terminate(self.display) {
            warn!("Failed to terminate EGL display: {:?}", e);
        }
    }
}
