//! EGL/GL implementation of [`GpuBackend`].
//!
//! libEGL is loaded once per process with `libloading`; GL entry points are
//! resolved through `eglGetProcAddress` into the `gl` crate. Context A is a
//! surfaceless context on the host's display and config. The shared image uses
//! `EGL_KHR_gl_texture_2D_image` on the exporting side and
//! `GL_OES_EGL_image` on the importing side.

use std::{
    cell::Cell,
    ffi::{CString, c_char, c_void},
    fmt, ptr,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use libloading::Library;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;

use super::backend::{
    ContextBinding, ContextMode, FrameSize, GlStateSnapshot, GlTexture, GlFramebuffer, GpuBackend, RenderTarget,
    SharedImage,
};
use crate::{constants::EGL_LIBRARY_NAMES, engine::ProcAddressResolver, error::BridgeError};

pub const EGL_NO_CONTEXT: *mut c_void = ptr::null_mut();
pub const EGL_NO_SURFACE: *mut c_void = ptr::null_mut();
pub const EGL_TRUE: i32 = 1;
pub const EGL_NONE: i32 = 0x3038;
pub const EGL_SUCCESS: i32 = 0x3000;
pub const EGL_CONFIG_ID: i32 = 0x3028;
pub const EGL_DRAW: i32 = 0x3059;
pub const EGL_READ: i32 = 0x305A;
pub const EGL_CONTEXT_CLIENT_TYPE: i32 = 0x3097;
pub const EGL_CONTEXT_CLIENT_VERSION: i32 = 0x3098;
pub const EGL_OPENGL_ES_API: i32 = 0x30A0;
pub const EGL_OPENGL_API: i32 = 0x30A2;
pub const EGL_GL_TEXTURE_2D_KHR: u32 = 0x30B1;
pub const EGL_GL_TEXTURE_LEVEL_KHR: i32 = 0x30BC;
pub const EGL_IMAGE_PRESERVED_KHR: i32 = 0x30D2;

type EglGetProcAddress = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type EglGetCurrentContext = unsafe extern "C" fn() -> *mut c_void;
type EglGetCurrentDisplay = unsafe extern "C" fn() -> *mut c_void;
type EglGetCurrentSurface = unsafe extern "C" fn(i32) -> *mut c_void;
type EglMakeCurrent = unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void, *mut c_void) -> u32;
type EglCreateContext = unsafe extern "C" fn(*mut c_void, *mut c_void, *mut c_void, *const i32) -> *mut c_void;
type EglDestroyContext = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type EglQueryContext = unsafe extern "C" fn(*mut c_void, *mut c_void, i32, *mut i32) -> u32;
type EglChooseConfig = unsafe extern "C" fn(*mut c_void, *const i32, *mut *mut c_void, i32, *mut i32) -> u32;
type EglBindApi = unsafe extern "C" fn(u32) -> u32;
type EglQueryApi = unsafe extern "C" fn() -> u32;
type EglGetError = unsafe extern "C" fn() -> i32;
type EglCreateImageKhr = unsafe extern "C" fn(*mut c_void, *mut c_void, u32, *mut c_void, *const i32) -> *mut c_void;
type EglDestroyImageKhr = unsafe extern "C" fn(*mut c_void, *mut c_void) -> u32;
type GlEglImageTargetTexture2dOes = unsafe extern "C" fn(u32, *mut c_void);

/// An `eglGetError` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EglError(i32);

impl EglError {
    fn describe(self) -> &'static str {
        match self.0 {
            EGL_SUCCESS => "no error",
            0x3001 => "display not initialized",
            0x3002 => "resource in use by another thread",
            0x3003 => "out of memory",
            0x3004 => "bad attribute",
            0x3005 => "bad config",
            0x3006 => "bad context",
            0x3007 => "current surface no longer valid",
            0x3008 => "bad display",
            0x3009 => "arguments inconsistent",
            0x300C => "bad parameter",
            0x300D => "bad surface",
            0x300E => "context lost",
            _ => "unrecognized error",
        }
    }

    /// Failure of `call` while setting up context A.
    fn init_failure(self, call: &str) -> BridgeError {
        BridgeError::Initialization(format!("{call}: {self}"))
    }

    /// Failure of `call` while moving a frame between contexts.
    fn bridge_failure(self, call: &str) -> BridgeError {
        BridgeError::ResourceBridge(format!("{call}: {self}"))
    }
}

impl fmt::Display for EglError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (EGL {:#06X})", self.describe(), self.0)
    }
}

/// libEGL and its entry points, shared by every backend in the process.
struct SharedEgl {
    _lib: Library,
    get_proc_address: EglGetProcAddress,
    get_current_context: EglGetCurrentContext,
    get_current_display: EglGetCurrentDisplay,
    get_current_surface: EglGetCurrentSurface,
    make_current: EglMakeCurrent,
    create_context: EglCreateContext,
    destroy_context: EglDestroyContext,
    query_context: EglQueryContext,
    choose_config: EglChooseConfig,
    bind_api: EglBindApi,
    query_api: EglQueryApi,
    get_error: EglGetError,
}

static SHARED_EGL: OnceCell<SharedEgl> = OnceCell::new();

fn load_shared_egl() -> Result<SharedEgl> {
    let mut last_err = None;
    for name in EGL_LIBRARY_NAMES {
        match unsafe { Library::new(name) } {
            Ok(lib) => unsafe {
                let get_proc_address = *lib
                    .get::<EglGetProcAddress>(b"eglGetProcAddress\0")
                    .context("Missing symbol: eglGetProcAddress")?;
                let get_current_context = *lib
                    .get::<EglGetCurrentContext>(b"eglGetCurrentContext\0")
                    .context("Missing symbol: eglGetCurrentContext")?;
                let get_current_display = *lib
                    .get::<EglGetCurrentDisplay>(b"eglGetCurrentDisplay\0")
                    .context("Missing symbol: eglGetCurrentDisplay")?;
                let get_current_surface = *lib
                    .get::<EglGetCurrentSurface>(b"eglGetCurrentSurface\0")
                    .context("Missing symbol: eglGetCurrentSurface")?;
                let make_current = *lib
                    .get::<EglMakeCurrent>(b"eglMakeCurrent\0")
                    .context("Missing symbol: eglMakeCurrent")?;
                let create_context = *lib
                    .get::<EglCreateContext>(b"eglCreateContext\0")
                    .context("Missing symbol: eglCreateContext")?;
                let destroy_context = *lib
                    .get::<EglDestroyContext>(b"eglDestroyContext\0")
                    .context("Missing symbol: eglDestroyContext")?;
                let query_context = *lib
                    .get::<EglQueryContext>(b"eglQueryContext\0")
                    .context("Missing symbol: eglQueryContext")?;
                let choose_config = *lib
                    .get::<EglChooseConfig>(b"eglChooseConfig\0")
                    .context("Missing symbol: eglChooseConfig")?;
                let bind_api = *lib.get::<EglBindApi>(b"eglBindAPI\0").context("Missing symbol: eglBindAPI")?;
                let query_api = *lib.get::<EglQueryApi>(b"eglQueryAPI\0").context("Missing symbol: eglQueryAPI")?;
                let get_error = *lib.get::<EglGetError>(b"eglGetError\0").context("Missing symbol: eglGetError")?;

                info!("[EglBackend] Loaded {}", name);
                return Ok(SharedEgl {
                    _lib: lib,
                    get_proc_address,
                    get_current_context,
                    get_current_display,
                    get_current_surface,
                    make_current,
                    create_context,
                    destroy_context,
                    query_context,
                    choose_config,
                    bind_api,
                    query_api,
                    get_error,
                });
            },
            Err(e) => {
                debug!("[EglBackend] {} not loadable: {}", name, e);
                last_err = Some(e);
            }
        }
    }
    Err(match last_err {
        Some(e) => anyhow!(e).context("Failed to load libEGL"),
        None => anyhow!("No libEGL candidates"),
    })
}

impl SharedEgl {
    fn proc_address(&self, name: &str) -> *const c_void {
        match CString::new(name) {
            Ok(c_name) => unsafe { (self.get_proc_address)(c_name.as_ptr()) as *const c_void },
            Err(_) => ptr::null(),
        }
    }

    fn last_error(&self) -> EglError {
        EglError(unsafe { (self.get_error)() })
    }
}

/// Extension entry points for the shared image.
#[derive(Clone, Copy)]
struct ImageFns {
    create_image: EglCreateImageKhr,
    destroy_image: EglDestroyImageKhr,
    image_target_texture: GlEglImageTargetTexture2dOes,
}

fn p(raw: usize) -> *mut c_void {
    raw as *mut c_void
}

pub struct EglGpuBackend {
    egl: &'static SharedEgl,
    mode: ContextMode,
    image: Option<ImageFns>,
    engine_ctx: Cell<Option<ContextBinding>>,
}

impl EglGpuBackend {
    /// Loads libEGL and the GL entry points. No context needs to be current yet.
    pub fn load(mode: ContextMode) -> Result<Self> {
        let egl = SHARED_EGL.get_or_try_init(load_shared_egl)?;
        gl::load_with(|name| egl.proc_address(name));

        let image = unsafe {
            let create = egl.proc_address("eglCreateImageKHR");
            let destroy = egl.proc_address("eglDestroyImageKHR");
            let target = egl.proc_address("glEGLImageTargetTexture2DOES");
            if create.is_null() || destroy.is_null() || target.is_null() {
                None
            } else {
                Some(ImageFns {
                    create_image: std::mem::transmute::<*const c_void, EglCreateImageKhr>(create),
                    destroy_image: std::mem::transmute::<*const c_void, EglDestroyImageKhr>(destroy),
                    image_target_texture: std::mem::transmute::<*const c_void, GlEglImageTargetTexture2dOes>(target),
                })
            }
        };
        if mode == ContextMode::Separate && image.is_none() {
            return Err(anyhow!("EGL image extensions unavailable; use the shared-context mode"));
        }
        Ok(Self { egl, mode, image, engine_ctx: Cell::new(None) })
    }

    fn image_fns(&self) -> Result<ImageFns, BridgeError> {
        self.image
            .ok_or_else(|| BridgeError::ResourceBridge("EGL image extensions unavailable".to_string()))
    }

    fn create_engine_context(&self) -> Result<ContextBinding, BridgeError> {
        let host = self.current_binding();
        if host.is_none() {
            return Err(BridgeError::Initialization("no host GL context current".to_string()));
        }
        let egl = self.egl;
        let display = p(host.display);
        unsafe {
            let mut config_id = 0;
            (egl.query_context)(display, p(host.context), EGL_CONFIG_ID, &mut config_id);
            let config_attribs = [EGL_CONFIG_ID, config_id, EGL_NONE];
            let mut config = ptr::null_mut();
            let mut count = 0;
            if (egl.choose_config)(display, config_attribs.as_ptr(), &mut config, 1, &mut count) == 0 || count < 1 {
                return Err(egl.last_error().init_failure("eglChooseConfig"));
            }

            let mut client_type = EGL_OPENGL_API;
            (egl.query_context)(display, p(host.context), EGL_CONTEXT_CLIENT_TYPE, &mut client_type);
            let mut client_version = 0;
            (egl.query_context)(display, p(host.context), EGL_CONTEXT_CLIENT_VERSION, &mut client_version);
            // The bound API is per-thread state the host owns.
            let host_api = (egl.query_api)();
            (egl.bind_api)(client_type as u32);

            let context_attribs: Vec<i32> = if client_type == EGL_OPENGL_ES_API {
                vec![EGL_CONTEXT_CLIENT_VERSION, client_version.max(2), EGL_NONE]
            } else {
                vec![EGL_NONE]
            };
            let context = (egl.create_context)(display, config, EGL_NO_CONTEXT, context_attribs.as_ptr());
            (egl.bind_api)(host_api);
            if context.is_null() {
                return Err(egl.last_error().init_failure("eglCreateContext"));
            }
            info!("[EglBackend] Created engine context {:p} (api {:#X})", context, client_type);
            Ok(ContextBinding { display: host.display, draw_surface: 0, read_surface: 0, context: context as usize })
        }
    }
}

impl GpuBackend for EglGpuBackend {
    fn mode(&self) -> ContextMode {
        self.mode
    }

    fn current_binding(&self) -> ContextBinding {
        unsafe {
            ContextBinding {
                display: (self.egl.get_current_display)() as usize,
                draw_surface: (self.egl.get_current_surface)(EGL_DRAW) as usize,
                read_surface: (self.egl.get_current_surface)(EGL_READ) as usize,
                context: (self.egl.get_current_context)() as usize,
            }
        }
    }

    fn make_current(&self, binding: ContextBinding) -> bool {
        let display = if binding.display != 0 {
            binding.display
        } else {
            // Releasing needs a display even when nothing was current before.
            self.engine_ctx.get().map(|b| b.display).unwrap_or(0)
        };
        let ok = unsafe {
            (self.egl.make_current)(p(display), p(binding.draw_surface), p(binding.read_surface), p(binding.context))
        } != 0;
        if !ok {
            error!("[EglBackend] eglMakeCurrent failed: {}", self.egl.last_error());
        }
        ok
    }

    fn engine_binding(&self) -> Result<ContextBinding, BridgeError> {
        if self.mode == ContextMode::Shared {
            let current = self.current_binding();
            if current.is_none() {
                return Err(BridgeError::Initialization("no host GL context current".to_string()));
            }
            return Ok(current);
        }
        if let Some(binding) = self.engine_ctx.get() {
            return Ok(binding);
        }
        let binding = self.create_engine_context()?;
        self.engine_ctx.set(Some(binding));
        Ok(binding)
    }

    fn destroy_engine_context(&self) {
        let Some(binding) = self.engine_ctx.take() else {
            return;
        };
        if self.current_binding().context == binding.context {
            self.make_current(ContextBinding { display: binding.display, ..ContextBinding::NONE });
        }
        unsafe {
            if (self.egl.destroy_context)(p(binding.display), p(binding.context)) == 0 {
                warn!("[EglBackend] eglDestroyContext failed: {}", self.egl.last_error());
            }
        }
        debug!("[EglBackend] Engine context destroyed");
    }

    fn create_render_target(&self, size: FrameSize) -> Result<RenderTarget, BridgeError> {
        unsafe {
            let mut prev_texture = 0;
            let mut prev_framebuffer = 0;
            gl::GetIntegerv(gl::TEXTURE_BINDING_2D, &mut prev_texture);
            gl::GetIntegerv(gl::FRAMEBUFFER_BINDING, &mut prev_framebuffer);

            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
            gl::TexImage2D(
                gl::TEXTURE_2D,
                0,
                gl::RGBA8 as i32,
                size.width,
                size.height,
                0,
                gl::RGBA,
                gl::UNSIGNED_BYTE,
                ptr::null(),
            );

            let mut framebuffer = 0;
            gl::GenFramebuffers(1, &mut framebuffer);
            gl::BindFramebuffer(gl::FRAMEBUFFER, framebuffer);
            gl::FramebufferTexture2D(gl::FRAMEBUFFER, gl::COLOR_ATTACHMENT0, gl::TEXTURE_2D, texture, 0);
            let status = gl::CheckFramebufferStatus(gl::FRAMEBUFFER);

            gl::BindFramebuffer(gl::FRAMEBUFFER, prev_framebuffer as u32);
            gl::BindTexture(gl::TEXTURE_2D, prev_texture as u32);

            if status != gl::FRAMEBUFFER_COMPLETE {
                gl::DeleteFramebuffers(1, &framebuffer);
                gl::DeleteTextures(1, &texture);
                return Err(BridgeError::ResourceBridge(format!("framebuffer incomplete ({:#X})", status)));
            }
            Ok(RenderTarget {
                texture: GlTexture::from_raw(texture),
                framebuffer: GlFramebuffer::from_raw(framebuffer),
            })
        }
    }

    fn delete_render_target(&self, target: RenderTarget) {
        let (framebuffer, texture) = (target.framebuffer.name(), target.texture.name());
        unsafe {
            gl::DeleteFramebuffers(1, &framebuffer);
            gl::DeleteTextures(1, &texture);
        }
    }

    fn export_image(&self, target: &RenderTarget) -> Result<SharedImage, BridgeError> {
        let fns = self.image_fns()?;
        let binding = self
            .engine_ctx
            .get()
            .ok_or_else(|| BridgeError::ResourceBridge("engine context missing".to_string()))?;
        let attribs = [EGL_GL_TEXTURE_LEVEL_KHR, 0, EGL_IMAGE_PRESERVED_KHR, EGL_TRUE, EGL_NONE];
        let image = unsafe {
            (fns.create_image)(
                p(binding.display),
                p(binding.context),
                EGL_GL_TEXTURE_2D_KHR,
                target.texture.name() as usize as *mut c_void,
                attribs.as_ptr(),
            )
        };
        if image.is_null() {
            return Err(self.egl.last_error().bridge_failure("eglCreateImageKHR"));
        }
        Ok(SharedImage::from_raw(image as usize))
    }

    fn destroy_image(&self, image: SharedImage) {
        let (Some(fns), Some(binding)) = (self.image, self.engine_ctx.get()) else {
            return;
        };
        unsafe {
            if (fns.destroy_image)(p(binding.display), p(image.raw())) == 0 {
                warn!("[EglBackend] eglDestroyImageKHR failed: {}", self.egl.last_error());
            }
        }
    }

    fn import_image(&self, image: &SharedImage, size: FrameSize) -> Result<GlTexture, BridgeError> {
        let fns = self.image_fns()?;
        unsafe {
            let mut prev_texture = 0;
            gl::GetIntegerv(gl::TEXTURE_BINDING_2D, &mut prev_texture);
            while gl::GetError() != gl::NO_ERROR {}

            let mut texture = 0;
            gl::GenTextures(1, &mut texture);
            gl::BindTexture(gl::TEXTURE_2D, texture);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MIN_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_MAG_FILTER, gl::LINEAR as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_S, gl::CLAMP_TO_EDGE as i32);
            gl::TexParameteri(gl::TEXTURE_2D, gl::TEXTURE_WRAP_T, gl::CLAMP_TO_EDGE as i32);
            (fns.image_target_texture)(gl::TEXTURE_2D, p(image.raw()));
            let err = gl::GetError();
            gl::BindTexture(gl::TEXTURE_2D, prev_texture as u32);

            if err != gl::NO_ERROR {
                gl::DeleteTextures(1, &texture);
                return Err(BridgeError::ResourceBridge(format!(
                    "glEGLImageTargetTexture2DOES {}x{}: GL error {:#X}",
                    size.width, size.height, err
                )));
            }
            Ok(GlTexture::from_raw(texture))
        }
    }

    fn delete_texture(&self, texture: GlTexture) {
        let name = texture.name();
        unsafe { gl::DeleteTextures(1, &name) };
    }

    fn capture_state(&self) -> GlStateSnapshot {
        let mut s = GlStateSnapshot::default();
        unsafe {
            gl::GetIntegerv(gl::VIEWPORT, s.viewport.as_mut_ptr());
            gl::GetIntegerv(gl::SCISSOR_BOX, s.scissor_box.as_mut_ptr());
            s.scissor_test = gl::IsEnabled(gl::SCISSOR_TEST) == gl::TRUE;
            s.blend = gl::IsEnabled(gl::BLEND) == gl::TRUE;
            gl::GetIntegerv(gl::BLEND_SRC_RGB, &mut s.blend_src_rgb);
            gl::GetIntegerv(gl::BLEND_DST_RGB, &mut s.blend_dst_rgb);
            gl::GetIntegerv(gl::BLEND_SRC_ALPHA, &mut s.blend_src_alpha);
            gl::GetIntegerv(gl::BLEND_DST_ALPHA, &mut s.blend_dst_alpha);
            gl::GetIntegerv(gl::FRAMEBUFFER_BINDING, &mut s.framebuffer);
            gl::GetFloatv(gl::COLOR_CLEAR_VALUE, s.clear_color.as_mut_ptr());
        }
        s
    }

    fn restore_state(&self, s: &GlStateSnapshot) {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, s.framebuffer as u32);
            gl::Viewport(s.viewport[0], s.viewport[1], s.viewport[2], s.viewport[3]);
            gl::Scissor(s.scissor_box[0], s.scissor_box[1], s.scissor_box[2], s.scissor_box[3]);
            if s.scissor_test {
                gl::Enable(gl::SCISSOR_TEST);
            } else {
                gl::Disable(gl::SCISSOR_TEST);
            }
            if s.blend {
                gl::Enable(gl::BLEND);
            } else {
                gl::Disable(gl::BLEND);
            }
            gl::BlendFuncSeparate(
                s.blend_src_rgb as u32,
                s.blend_dst_rgb as u32,
                s.blend_src_alpha as u32,
                s.blend_dst_alpha as u32,
            );
            let [r, g, b, a] = s.clear_color;
            gl::ClearColor(r, g, b, a);
        }
    }

    fn bind_target(&self, target: &RenderTarget, size: FrameSize) {
        unsafe {
            gl::BindFramebuffer(gl::FRAMEBUFFER, target.framebuffer.name());
            gl::Viewport(0, 0, size.width, size.height);
        }
    }

    fn clear_transparent(&self, target: &RenderTarget, size: FrameSize) {
        self.bind_target(target, size);
        unsafe {
            gl::Disable(gl::SCISSOR_TEST);
            gl::ClearColor(0.0, 0.0, 0.0, 0.0);
            gl::Clear(gl::COLOR_BUFFER_BIT);
        }
    }

    fn flush(&self) {
        unsafe { gl::Finish() };
    }

    fn proc_resolver(&self) -> ProcAddressResolver {
        let egl = self.egl;
        Arc::new(move |name: &str| egl.proc_address(name))
    }
}

impl Drop for EglGpuBackend {
    fn drop(&mut self) {
        if self.engine_ctx.get().is_some() {
            self.destroy_engine_context();
        }
    }
}
