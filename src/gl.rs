//! Minimal GLES entry points for the demo client
//!
//! libGLESv2 is opened at runtime like libEGL, and only the handful of calls
//! needed to clear the screen and identify the driver are resolved.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};

use anyhow::{anyhow, Result};

pub const COLOR_BUFFER_BIT: u32 = 0x0000_4000;
pub const VENDOR: u32 = 0x1F00;
pub const RENDERER: u32 = 0x1F01;
pub const VERSION: u32 = 0x1F02;

type ClearColorFn = unsafe extern "C" fn(f32, f32, f32, f32);
type ClearFn = unsafe extern "C" fn(u32);
type ViewportFn = unsafe extern "C" fn(i32, i32, i32, i32);
type GetStringFn = unsafe extern "C" fn(u32) -> *const u8;

unsafe fn load_fn<T>(lib: *mut c_void, name: &[u8]) -> Option<T> {
    let ptr = libc::dlsym(lib, name.as_ptr() as *const c_char);
    if ptr.is_null() {
        None
    } else {
        Some(std::mem::transmute_copy(&ptr))
    }
}

/// Resolved GLES functions. Only valid while a context is current on the
/// calling thread.
pub struct Gles {
    clear_color: ClearColorFn,
    clear: ClearFn,
    viewport: ViewportFn,
    get_string: GetStringFn,
}

impl Gles {
    pub fn load() -> Result<Self> {
        // The library stays loaded for the life of the process.
        let lib = unsafe {
            let lib = libc::dlopen(
                b"libGLESv2.so.2\0".as_ptr() as *const c_char,
                libc::RTLD_NOW | libc::RTLD_GLOBAL,
            );
            if lib.is_null() {
                libc::dlopen(
                    b"libGLESv2.so\0".as_ptr() as *const c_char,
                    libc::RTLD_NOW | libc::RTLD_GLOBAL,
                )
            } else {
                lib
            }
        };
        if lib.is_null() {
            return Err(anyhow!("Failed to load libGLESv2"));
        }

        unsafe {
            Ok(Self {
                clear_color: load_fn(lib, b"glClearColor\0")
                    .ok_or_else(|| anyhow!("glClearColor missing"))?,
                clear: load_fn(lib, b"glClear\0").ok_or_else(|| anyhow!("glClear missing"))?,
                viewport: load_fn(lib, b"glViewport\0")
                    .ok_or_else(|| anyhow!("glViewport missing"))?,
                get_string: load_fn(lib, b"glGetString\0")
                    .ok_or_else(|| anyhow!("glGetString missing"))?,
            })
        }
    }

    pub fn clear_color(&self, r: f32, g: f32, b: f32, a: f32) {
        unsafe { (self.clear_color)(r, g, b, a) }
    }

    pub fn clear(&self, mask: u32) {
        unsafe { (self.clear)(mask) }
    }

    pub fn viewport(&self, x: i32, y: i32, width: i32, height: i32) {
        unsafe { (self.viewport)(x, y, width, height) }
    }

    /// `glGetString`, or `None` if the driver returns NULL
    pub fn get_string(&self, name: u32) -> Option<String> {
        let ptr = unsafe { (self.get_string)(name) };
        if ptr.is_null() {
            return None;
        }
        let value = unsafe { CStr::from_ptr(ptr as *const c_char) };
        Some(value.to_string_lossy().into_owned())
    }
}

/// Demo clear colour: red fading to green as `progress` goes 0 -> 1.
pub fn fade_color(progress: f32) -> [f32; 3] {
    let p = progress.clamp(0.0, 1.0);
    [1.0 - p, p, 0.0]
}
