//! GL Binding
//!
//! The texture uploader never touches process-wide GL state. It is handed a
//! [`GlBinding`], normally a [`GlFunctions`] table resolved once from the
//! caller's context loader or from the system GL library.

use libloading::Library;
use serde::{Deserialize, Serialize};
use std::ffi::c_void;
use thiserror::Error;

pub const GL_NO_ERROR: u32 = 0;
pub const GL_INVALID_VALUE: u32 = 0x0501;
pub const GL_INVALID_OPERATION: u32 = 0x0502;
pub const GL_TEXTURE_2D: u32 = 0x0DE1;
pub const GL_TEXTURE0: u32 = 0x84C0;
pub const GL_UNSIGNED_BYTE: u32 = 0x1401;
pub const GL_LUMINANCE: u32 = 0x1909;
pub const GL_LUMINANCE_ALPHA: u32 = 0x190A;
pub const GL_RGB: u32 = 0x1907;
pub const GL_RGBA: u32 = 0x1908;
pub const GL_BGR: u32 = 0x80E0;
pub const GL_BGRA: u32 = 0x80E1;

type PfnTexImage2D =
    unsafe extern "system" fn(u32, i32, i32, i32, i32, i32, u32, u32, *const c_void);
type PfnTexSubImage2D =
    unsafe extern "system" fn(u32, i32, i32, i32, i32, i32, u32, u32, *const c_void);
type PfnGetError = unsafe extern "system" fn() -> u32;
type PfnFlush = unsafe extern "system" fn();
type PfnFinish = unsafe extern "system" fn();
type PfnEnable = unsafe extern "system" fn(u32);
type PfnBindTexture = unsafe extern "system" fn(u32, u32);
type PfnActiveTexture = unsafe extern "system" fn(u32);

#[derive(Debug, Error)]
pub enum GlLoadError {
    #[error("GL library not found (tried {0:?})")]
    LibraryNotFound(Vec<String>),
}

/// Which of the entry points the uploader uses were resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlEntryPoints {
    pub tex_image_2d: bool,
    pub tex_sub_image_2d: bool,
    pub get_error: bool,
    pub flush: bool,
    pub finish: bool,
    pub enable: bool,
    pub bind_texture: bool,
    pub active_texture: bool,
}

impl GlEntryPoints {
    pub const ALL: GlEntryPoints = GlEntryPoints {
        tex_image_2d: true,
        tex_sub_image_2d: true,
        get_error: true,
        flush: true,
        finish: true,
        enable: true,
        bind_texture: true,
        active_texture: true,
    };

    /// Minimum needed to put pixels into a texture.
    pub fn can_upload(&self) -> bool {
        self.tex_image_2d && self.tex_sub_image_2d && self.bind_texture
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        let checks = [
            (self.tex_image_2d, "glTexImage2D"),
            (self.tex_sub_image_2d, "glTexSubImage2D"),
            (self.get_error, "glGetError"),
            (self.flush, "glFlush"),
            (self.finish, "glFinish"),
            (self.enable, "glEnable"),
            (self.bind_texture, "glBindTexture"),
            (self.active_texture, "glActiveTexture"),
        ];
        for (present, name) in checks {
            if !present {
                missing.push(name);
            }
        }
        missing
    }
}

/// The GL calls the texture uploader makes. Implementations must only be used
/// on the thread that owns the current GL context.
pub trait GlBinding {
    fn entry_points(&self) -> GlEntryPoints;

    /// Non-power-of-two textures are supported.
    fn has_npot(&self) -> bool;

    #[allow(clippy::too_many_arguments)]
    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    );

    #[allow(clippy::too_many_arguments)]
    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    );

    fn get_error(&self) -> u32;

    fn flush(&self);

    fn finish(&self);

    fn enable(&self, cap: u32);

    fn bind_texture(&self, target: u32, texture: u32);

    fn active_texture(&self, unit: u32);
}

// ============================================================================
// Resolved function table
// ============================================================================

#[derive(Clone, Copy, Default)]
pub struct GlFunctions {
    tex_image_2d: Option<PfnTexImage2D>,
    tex_sub_image_2d: Option<PfnTexSubImage2D>,
    get_error: Option<PfnGetError>,
    flush: Option<PfnFlush>,
    finish: Option<PfnFinish>,
    enable: Option<PfnEnable>,
    bind_texture: Option<PfnBindTexture>,
    active_texture: Option<PfnActiveTexture>,
    has_npot: bool,
}

impl std::fmt::Debug for GlFunctions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlFunctions")
            .field("entry_points", &self.entry_points())
            .field("has_npot", &self.has_npot)
            .finish()
    }
}

impl GlFunctions {
    /// Resolve entry points through a context loader such as
    /// `eglGetProcAddress` / `wglGetProcAddress`. Null results leave the entry
    /// point unresolved.
    ///
    /// # Safety
    /// Every non-null pointer returned by `loader` must be the GL function of
    /// that name for the context the table will be used with.
    pub unsafe fn load_with<F>(mut loader: F, has_npot: bool) -> Self
    where
        F: FnMut(&str) -> *const c_void,
    {
        let mut resolve = |name: &str| {
            let ptr = loader(name);
            if ptr.is_null() {
                tracing::debug!("GL entry point {} not resolved", name);
                None
            } else {
                Some(ptr)
            }
        };

        Self {
            tex_image_2d: resolve("glTexImage2D")
                .map(|p| std::mem::transmute::<*const c_void, PfnTexImage2D>(p)),
            tex_sub_image_2d: resolve("glTexSubImage2D")
                .map(|p| std::mem::transmute::<*const c_void, PfnTexSubImage2D>(p)),
            get_error: resolve("glGetError")
                .map(|p| std::mem::transmute::<*const c_void, PfnGetError>(p)),
            flush: resolve("glFlush").map(|p| std::mem::transmute::<*const c_void, PfnFlush>(p)),
            finish: resolve("glFinish")
                .map(|p| std::mem::transmute::<*const c_void, PfnFinish>(p)),
            enable: resolve("glEnable")
                .map(|p| std::mem::transmute::<*const c_void, PfnEnable>(p)),
            bind_texture: resolve("glBindTexture")
                .map(|p| std::mem::transmute::<*const c_void, PfnBindTexture>(p)),
            active_texture: resolve("glActiveTexture")
                .map(|p| std::mem::transmute::<*const c_void, PfnActiveTexture>(p)),
            has_npot,
        }
    }
}

impl GlBinding for GlFunctions {
    fn entry_points(&self) -> GlEntryPoints {
        GlEntryPoints {
            tex_image_2d: self.tex_image_2d.is_some(),
            tex_sub_image_2d: self.tex_sub_image_2d.is_some(),
            get_error: self.get_error.is_some(),
            flush: self.flush.is_some(),
            finish: self.finish.is_some(),
            enable: self.enable.is_some(),
            bind_texture: self.bind_texture.is_some(),
            active_texture: self.active_texture.is_some(),
        }
    }

    fn has_npot(&self) -> bool {
        self.has_npot
    }

    fn tex_image_2d(
        &self,
        target: u32,
        level: i32,
        internal_format: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: Option<&[u8]>,
    ) {
        if let Some(f) = self.tex_image_2d {
            let ptr = pixels.map_or(std::ptr::null(), |p| p.as_ptr() as *const c_void);
            // SAFETY: resolved for the current context in `load_with`; the
            // caller sized `pixels` for width x height in `format`.
            unsafe { f(target, level, internal_format, width, height, 0, format, ty, ptr) }
        }
    }

    fn tex_sub_image_2d(
        &self,
        target: u32,
        level: i32,
        x_offset: i32,
        y_offset: i32,
        width: i32,
        height: i32,
        format: u32,
        ty: u32,
        pixels: &[u8],
    ) {
        if let Some(f) = self.tex_sub_image_2d {
            // SAFETY: see tex_image_2d.
            unsafe {
                f(
                    target,
                    level,
                    x_offset,
                    y_offset,
                    width,
                    height,
                    format,
                    ty,
                    pixels.as_ptr() as *const c_void,
                )
            }
        }
    }

    fn get_error(&self) -> u32 {
        match self.get_error {
            // SAFETY: resolved for the current context.
            Some(f) => unsafe { f() },
            None => GL_NO_ERROR,
        }
    }

    fn flush(&self) {
        if let Some(f) = self.flush {
            unsafe { f() }
        }
    }

    fn finish(&self) {
        if let Some(f) = self.finish {
            unsafe { f() }
        }
    }

    fn enable(&self, cap: u32) {
        if let Some(f) = self.enable {
            unsafe { f(cap) }
        }
    }

    fn bind_texture(&self, target: u32, texture: u32) {
        if let Some(f) = self.bind_texture {
            unsafe { f(target, texture) }
        }
    }

    fn active_texture(&self, unit: u32) {
        if let Some(f) = self.active_texture {
            unsafe { f(unit) }
        }
    }
}

// ============================================================================
// System GL library
// ============================================================================

#[cfg(target_os = "windows")]
const GL_LIBRARY_NAMES: &[&str] = &["opengl32.dll"];
#[cfg(target_os = "macos")]
const GL_LIBRARY_NAMES: &[&str] =
    &["/System/Library/Frameworks/OpenGL.framework/Versions/Current/OpenGL"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
const GL_LIBRARY_NAMES: &[&str] = &["libGL.so.1", "libGL.so", "libOpenGL.so.0"];

/// The system GL library kept loaded for as long as its functions are in use.
pub struct GlLibrary {
    name: &'static str,
    functions: GlFunctions,
    _library: Library,
}

impl GlLibrary {
    /// Load the platform GL library and resolve the exported entry points.
    /// Entry points only reachable through a context loader (e.g.
    /// `glActiveTexture` on Windows) stay unresolved.
    ///
    /// # Safety
    /// The loaded functions must only be called with a current GL context.
    pub unsafe fn open(has_npot: bool) -> Result<Self, GlLoadError> {
        for name in GL_LIBRARY_NAMES {
            let library = match Library::new(name) {
                Ok(lib) => lib,
                Err(e) => {
                    tracing::debug!("GL library {} not loaded: {}", name, e);
                    continue;
                }
            };

            let functions = GlFunctions::load_with(
                |symbol| {
                    let mut c_name = symbol.as_bytes().to_vec();
                    c_name.push(0);
                    match library.get::<*const c_void>(&c_name) {
                        Ok(sym) => *sym,
                        Err(_) => std::ptr::null(),
                    }
                },
                has_npot,
            );

            tracing::info!("GL library {} loaded, {:?}", name, functions);
            return Ok(Self { name, functions, _library: library });
        }

        Err(GlLoadError::LibraryNotFound(
            GL_LIBRARY_NAMES.iter().map(|s| s.to_string()).collect(),
        ))
    }

    /// File the entry points were resolved from.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn functions(&self) -> &GlFunctions {
        &self.functions
    }
}
