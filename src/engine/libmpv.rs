use std::{
    collections::HashMap,
    ffi::{CStr, CString, c_char, c_int, c_void},
    path::{Path, PathBuf},
    ptr,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use libloading::{Library, Symbol};
use log::{debug, info};
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use super::{
    EndFileReason, Engine, EngineEvent, EngineFactory, EngineValue, LogMessage, ProcAddressResolver,
    PropertyFormat, RenderContext, WakeupCallback,
    ffi::{self, mpv_handle, mpv_render_context},
};
use crate::{constants::ENGINE_LIBRARY_NAMES, error::BridgeError};

/// Resolved libmpv entry points. The library is leaked so the symbols stay
/// `'static`; one table per path is cached for the life of the process.
pub struct MpvLibrary {
    path: PathBuf,
    _lib: &'static Library,

    mpv_create: Symbol<'static, unsafe extern "C" fn() -> *mut mpv_handle>,
    mpv_initialize: Symbol<'static, unsafe extern "C" fn(*mut mpv_handle) -> c_int>,
    mpv_terminate_destroy: Symbol<'static, unsafe extern "C" fn(*mut mpv_handle)>,
    mpv_set_option_string:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, *const c_char, *const c_char) -> c_int>,
    mpv_command: Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, *mut *const c_char) -> c_int>,
    mpv_command_async:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, u64, *mut *const c_char) -> c_int>,
    mpv_set_property_string:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, *const c_char, *const c_char) -> c_int>,
    mpv_get_property_string:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, *const c_char) -> *mut c_char>,
    mpv_free: Symbol<'static, unsafe extern "C" fn(*mut c_void)>,
    mpv_observe_property: Symbol<
        'static,
        unsafe extern "C" fn(*mut mpv_handle, u64, *const c_char, ffi::mpv_format) -> c_int,
    >,
    mpv_request_log_messages:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, *const c_char) -> c_int>,
    mpv_wait_event: Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, f64) -> *mut ffi::mpv_event>,
    mpv_set_wakeup_callback:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_handle, ffi::mpv_wakeup_fn, *mut c_void)>,
    mpv_error_string: Symbol<'static, unsafe extern "C" fn(c_int) -> *const c_char>,
    mpv_render_context_create: Symbol<
        'static,
        unsafe extern "C" fn(*mut *mut mpv_render_context, *mut mpv_handle, *mut ffi::mpv_render_param) -> c_int,
    >,
    mpv_render_context_set_update_callback:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_render_context, ffi::mpv_wakeup_fn, *mut c_void)>,
    mpv_render_context_render:
        Symbol<'static, unsafe extern "C" fn(*mut mpv_render_context, *mut ffi::mpv_render_param) -> c_int>,
    mpv_render_context_free: Symbol<'static, unsafe extern "C" fn(*mut mpv_render_context)>,
}

static LIBRARY_CACHE: Lazy<Mutex<HashMap<PathBuf, Arc<MpvLibrary>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

macro_rules! symbol {
    ($lib:expr, $name:literal) => {
        $lib.get(concat!($name, "\0").as_bytes())
            .context(concat!("Missing symbol: ", $name))?
    };
}

impl MpvLibrary {
    pub fn load(path: &Path) -> Result<Self> {
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("Failed to load {}", path.display()))?;
        let lib: &'static Library = Box::leak(Box::new(lib));

        unsafe {
            Ok(MpvLibrary {
                path: path.to_path_buf(),
                _lib: lib,
                mpv_create: symbol!(lib, "mpv_create"),
                mpv_initialize: symbol!(lib, "mpv_initialize"),
                mpv_terminate_destroy: symbol!(lib, "mpv_terminate_destroy"),
                mpv_set_option_string: symbol!(lib, "mpv_set_option_string"),
                mpv_command: symbol!(lib, "mpv_command"),
                mpv_command_async: symbol!(lib, "mpv_command_async"),
                mpv_set_property_string: symbol!(lib, "mpv_set_property_string"),
                mpv_get_property_string: symbol!(lib, "mpv_get_property_string"),
                mpv_free: symbol!(lib, "mpv_free"),
                mpv_observe_property: symbol!(lib, "mpv_observe_property"),
                mpv_request_log_messages: symbol!(lib, "mpv_request_log_messages"),
                mpv_wait_event: symbol!(lib, "mpv_wait_event"),
                mpv_set_wakeup_callback: symbol!(lib, "mpv_set_wakeup_callback"),
                mpv_error_string: symbol!(lib, "mpv_error_string"),
                mpv_render_context_create: symbol!(lib, "mpv_render_context_create"),
                mpv_render_context_set_update_callback: symbol!(lib, "mpv_render_context_set_update_callback"),
                mpv_render_context_render: symbol!(lib, "mpv_render_context_render"),
                mpv_render_context_free: symbol!(lib, "mpv_render_context_free"),
            })
        }
    }

    /// Returns the cached table for `explicit`, or for the first platform library
    /// name that loads.
    pub fn get_for(explicit: Option<&Path>) -> Result<Arc<Self>> {
        let candidates: Vec<PathBuf> = match explicit {
            Some(path) => vec![path.to_path_buf()],
            None => ENGINE_LIBRARY_NAMES.iter().map(PathBuf::from).collect(),
        };

        let mut cache = LIBRARY_CACHE.lock();
        for candidate in &candidates {
            if let Some(existing) = cache.get(candidate) {
                return Ok(existing.clone());
            }
        }

        let mut last_err = None;
        for candidate in candidates {
            match MpvLibrary::load(&candidate) {
                Ok(lib) => {
                    info!("[LibMpv] Loaded {}", candidate.display());
                    let lib = Arc::new(lib);
                    cache.insert(candidate, lib.clone());
                    return Ok(lib);
                }
                Err(e) => {
                    debug!("[LibMpv] {:#}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("No engine library candidates")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn error_string(&self, code: c_int) -> String {
        let raw = unsafe { (self.mpv_error_string)(code) };
        unsafe { cstr_to_string(raw) }
    }
}

/// Builds engines from the configured (or probed) shared library.
pub struct LibMpvFactory {
    library_path: Option<PathBuf>,
}

impl LibMpvFactory {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }
}

impl EngineFactory for LibMpvFactory {
    fn create(&self) -> Result<Box<dyn Engine>, BridgeError> {
        let lib = MpvLibrary::get_for(self.library_path.as_deref())?;
        let handle = unsafe { (lib.mpv_create)() };
        if handle.is_null() {
            return Err(BridgeError::Initialization("mpv_create returned null".to_string()));
        }
        Ok(Box::new(LibMpvEngine {
            lib,
            handle: SendableMpvHandle(handle),
            wakeup: Mutex::new(None),
        }))
    }
}

struct SendableMpvHandle(*mut mpv_handle);

// The libmpv client API is thread-safe for a single handle.
unsafe impl Send for SendableMpvHandle {}
unsafe impl Sync for SendableMpvHandle {}

pub struct LibMpvEngine {
    lib: Arc<MpvLibrary>,
    handle: SendableMpvHandle,
    // Boxed so the pointer handed to libmpv stays stable while installed.
    wakeup: Mutex<Option<Box<WakeupCallback>>>,
}

fn check(rc: c_int) -> Result<(), i32> {
    if rc < 0 { Err(rc) } else { Ok(()) }
}

fn to_cstring(s: &str) -> Result<CString, i32> {
    CString::new(s).map_err(|_| ffi::MPV_ERROR_INVALID_PARAMETER)
}

fn to_cstrings(args: &[String]) -> Result<Vec<CString>, i32> {
    args.iter().map(|a| to_cstring(a)).collect()
}

unsafe fn cstr_to_string(raw: *const c_char) -> String {
    if raw.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(raw) }.to_string_lossy().into_owned()
    }
}

unsafe fn node_to_value(node: &ffi::mpv_node) -> EngineValue {
    unsafe {
        match node.format {
            ffi::MPV_FORMAT_STRING | ffi::MPV_FORMAT_OSD_STRING => {
                EngineValue::String(cstr_to_string(node.u.string))
            }
            ffi::MPV_FORMAT_FLAG => EngineValue::Flag(node.u.flag != 0),
            ffi::MPV_FORMAT_INT64 => EngineValue::Int64(node.u.int64),
            ffi::MPV_FORMAT_DOUBLE => EngineValue::Double(node.u.double_),
            ffi::MPV_FORMAT_NODE_ARRAY => {
                let Some(list) = node.u.list.as_ref() else {
                    return EngineValue::List(Vec::new());
                };
                let items = (0..list.num.max(0) as usize)
                    .map(|i| node_to_value(&*list.values.add(i)))
                    .collect();
                EngineValue::List(items)
            }
            ffi::MPV_FORMAT_NODE_MAP => {
                let Some(list) = node.u.list.as_ref() else {
                    return EngineValue::Map(Vec::new());
                };
                let entries = (0..list.num.max(0) as usize)
                    .map(|i| {
                        (
                            cstr_to_string(*list.keys.add(i)),
                            node_to_value(&*list.values.add(i)),
                        )
                    })
                    .collect();
                EngineValue::Map(entries)
            }
            _ => EngineValue::None,
        }
    }
}

unsafe fn property_value(format: ffi::mpv_format, data: *mut c_void) -> EngineValue {
    if data.is_null() {
        return EngineValue::None;
    }
    unsafe {
        match format {
            ffi::MPV_FORMAT_STRING | ffi::MPV_FORMAT_OSD_STRING => {
                EngineValue::String(cstr_to_string(*(data as *const *const c_char)))
            }
            ffi::MPV_FORMAT_FLAG => EngineValue::Flag(*(data as *const c_int) != 0),
            ffi::MPV_FORMAT_INT64 => EngineValue::Int64(*(data as *const i64)),
            ffi::MPV_FORMAT_DOUBLE => EngineValue::Double(*(data as *const f64)),
            ffi::MPV_FORMAT_NODE => node_to_value(&*(data as *const ffi::mpv_node)),
            _ => EngineValue::None,
        }
    }
}

unsafe fn translate_event(event: &ffi::mpv_event) -> Option<EngineEvent> {
    unsafe {
        let translated = match event.event_id {
            ffi::MPV_EVENT_NONE => return None,
            ffi::MPV_EVENT_SHUTDOWN => EngineEvent::Shutdown,
            ffi::MPV_EVENT_LOG_MESSAGE => {
                let msg = &*(event.data as *const ffi::mpv_event_log_message);
                EngineEvent::LogMessage(LogMessage {
                    prefix: cstr_to_string(msg.prefix),
                    level: cstr_to_string(msg.level),
                    text: cstr_to_string(msg.text).trim_end().to_string(),
                })
            }
            ffi::MPV_EVENT_PROPERTY_CHANGE => {
                let prop = &*(event.data as *const ffi::mpv_event_property);
                EngineEvent::PropertyChange {
                    reply_id: event.reply_userdata,
                    name: cstr_to_string(prop.name),
                    value: property_value(prop.format, prop.data),
                }
            }
            ffi::MPV_EVENT_COMMAND_REPLY => EngineEvent::CommandReply {
                reply_id: event.reply_userdata,
                error: event.error,
            },
            ffi::MPV_EVENT_END_FILE => {
                let end = &*(event.data as *const ffi::mpv_event_end_file);
                EngineEvent::EndFile {
                    reason: EndFileReason::from_raw(end.reason),
                    error: end.error,
                }
            }
            ffi::MPV_EVENT_FILE_LOADED => EngineEvent::FileLoaded,
            ffi::MPV_EVENT_PLAYBACK_RESTART => EngineEvent::PlaybackRestart,
            ffi::MPV_EVENT_SEEK => EngineEvent::Seek,
            other => EngineEvent::Other(other),
        };
        Some(translated)
    }
}

unsafe extern "C" fn wakeup_trampoline(ctx: *mut c_void) {
    if ctx.is_null() {
        return;
    }
    let callback = unsafe { &*(ctx as *const WakeupCallback) };
    callback();
}

unsafe extern "C" fn proc_address_trampoline(ctx: *mut c_void, name: *const c_char) -> *mut c_void {
    if ctx.is_null() || name.is_null() {
        return ptr::null_mut();
    }
    let resolver = unsafe { &*(ctx as *const ProcAddressResolver) };
    match unsafe { CStr::from_ptr(name) }.to_str() {
        Ok(name) => resolver(name) as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

impl LibMpvEngine {
    fn raw(&self) -> *mut mpv_handle {
        self.handle.0
    }

    fn install_wakeup(&self, callback: Option<Box<WakeupCallback>>) {
        let mut slot = self.wakeup.lock();
        match &callback {
            Some(boxed) => {
                let ctx = &**boxed as *const WakeupCallback as *mut c_void;
                unsafe { (self.lib.mpv_set_wakeup_callback)(self.raw(), Some(wakeup_trampoline), ctx) };
            }
            None => unsafe { (self.lib.mpv_set_wakeup_callback)(self.raw(), None, ptr::null_mut()) },
        }
        // The previous box is only freed once libmpv points elsewhere.
        *slot = callback;
    }
}

impl Engine for LibMpvEngine {
    fn set_option(&self, name: &str, value: &str) -> Result<(), i32> {
        let (name, value) = (to_cstring(name)?, to_cstring(value)?);
        check(unsafe { (self.lib.mpv_set_option_string)(self.raw(), name.as_ptr(), value.as_ptr()) })
    }

    fn initialize(&self) -> Result<(), i32> {
        check(unsafe { (self.lib.mpv_initialize)(self.raw()) })
    }

    fn request_log_messages(&self, level: &str) -> Result<(), i32> {
        let level = to_cstring(level)?;
        check(unsafe { (self.lib.mpv_request_log_messages)(self.raw(), level.as_ptr()) })
    }

    fn command(&self, args: &[String]) -> Result<(), i32> {
        let owned = to_cstrings(args)?;
        let mut argv: Vec<*const c_char> = owned.iter().map(|a| a.as_ptr()).collect();
        argv.push(ptr::null());
        check(unsafe { (self.lib.mpv_command)(self.raw(), argv.as_mut_ptr()) })
    }

    fn command_async(&self, reply_id: u64, args: &[String]) -> Result<(), i32> {
        let owned = to_cstrings(args)?;
        let mut argv: Vec<*const c_char> = owned.iter().map(|a| a.as_ptr()).collect();
        argv.push(ptr::null());
        check(unsafe { (self.lib.mpv_command_async)(self.raw(), reply_id, argv.as_mut_ptr()) })
    }

    fn set_property(&self, name: &str, value: &str) -> Result<(), i32> {
        let (name, value) = (to_cstring(name)?, to_cstring(value)?);
        check(unsafe { (self.lib.mpv_set_property_string)(self.raw(), name.as_ptr(), value.as_ptr()) })
    }

    fn get_property(&self, name: &str) -> Option<String> {
        let name = to_cstring(name).ok()?;
        let raw = unsafe { (self.lib.mpv_get_property_string)(self.raw(), name.as_ptr()) };
        if raw.is_null() {
            return None;
        }
        let value = unsafe { cstr_to_string(raw) };
        unsafe { (self.lib.mpv_free)(raw as *mut c_void) };
        Some(value)
    }

    fn observe_property(&self, reply_id: u64, name: &str, format: PropertyFormat) -> Result<(), i32> {
        let name = to_cstring(name)?;
        check(unsafe {
            (self.lib.mpv_observe_property)(self.raw(), reply_id, name.as_ptr(), format.as_raw())
        })
    }

    fn poll_event(&self) -> Option<EngineEvent> {
        let event = unsafe { (self.lib.mpv_wait_event)(self.raw(), 0.0) };
        let event = unsafe { event.as_ref() }?;
        unsafe { translate_event(event) }
    }

    fn set_wakeup_callback(&self, callback: Option<WakeupCallback>) {
        self.install_wakeup(callback.map(Box::new));
    }

    fn create_render_context(&self, resolver: ProcAddressResolver) -> Result<Box<dyn RenderContext>, i32> {
        let resolver = Box::new(resolver);
        let mut init = ffi::mpv_opengl_init_params {
            get_proc_address: Some(proc_address_trampoline),
            get_proc_address_ctx: &*resolver as *const ProcAddressResolver as *mut c_void,
        };
        let mut params = [
            ffi::mpv_render_param {
                type_: ffi::MPV_RENDER_PARAM_API_TYPE,
                data: ffi::MPV_RENDER_API_TYPE_OPENGL.as_ptr() as *mut c_void,
            },
            ffi::mpv_render_param {
                type_: ffi::MPV_RENDER_PARAM_OPENGL_INIT_PARAMS,
                data: &mut init as *mut _ as *mut c_void,
            },
            ffi::mpv_render_param { type_: ffi::MPV_RENDER_PARAM_INVALID, data: ptr::null_mut() },
        ];

        let mut ctx: *mut mpv_render_context = ptr::null_mut();
        check(unsafe { (self.lib.mpv_render_context_create)(&mut ctx, self.raw(), params.as_mut_ptr()) })?;
        if ctx.is_null() {
            return Err(ffi::MPV_ERROR_UNSUPPORTED);
        }
        Ok(Box::new(LibMpvRenderContext {
            lib: self.lib.clone(),
            ctx,
            _resolver: resolver,
            update: None,
        }))
    }

    fn error_string(&self, code: i32) -> String {
        self.lib.error_string(code)
    }
}

impl Drop for LibMpvEngine {
    fn drop(&mut self) {
        self.install_wakeup(None);
        debug!("[LibMpv] Terminating engine instance");
        unsafe { (self.lib.mpv_terminate_destroy)(self.raw()) };
    }
}

struct LibMpvRenderContext {
    lib: Arc<MpvLibrary>,
    ctx: *mut mpv_render_context,
    _resolver: Box<ProcAddressResolver>,
    update: Option<Box<WakeupCallback>>,
}

// Render calls happen on the host render thread only; the update callback
// itself is installed through the thread-safe setter.
unsafe impl Send for LibMpvRenderContext {}

impl RenderContext for LibMpvRenderContext {
    fn set_update_callback(&mut self, callback: Option<WakeupCallback>) {
        let callback = callback.map(Box::new);
        match &callback {
            Some(boxed) => {
                let ctx = &**boxed as *const WakeupCallback as *mut c_void;
                unsafe {
                    (self.lib.mpv_render_context_set_update_callback)(self.ctx, Some(wakeup_trampoline), ctx)
                };
            }
            None => unsafe {
                (self.lib.mpv_render_context_set_update_callback)(self.ctx, None, ptr::null_mut())
            },
        }
        self.update = callback;
    }

    fn render(&mut self, fbo: u32, width: i32, height: i32, flip_y: bool) -> Result<(), i32> {
        let mut target = ffi::mpv_opengl_fbo { fbo: fbo as c_int, w: width, h: height, internal_format: 0 };
        let mut flip: c_int = flip_y as c_int;
        let mut params = [
            ffi::mpv_render_param {
                type_: ffi::MPV_RENDER_PARAM_OPENGL_FBO,
                data: &mut target as *mut _ as *mut c_void,
            },
            ffi::mpv_render_param {
                type_: ffi::MPV_RENDER_PARAM_FLIP_Y,
                data: &mut flip as *mut _ as *mut c_void,
            },
            ffi::mpv_render_param { type_: ffi::MPV_RENDER_PARAM_INVALID, data: ptr::null_mut() },
        ];
        check(unsafe { (self.lib.mpv_render_context_render)(self.ctx, params.as_mut_ptr()) })
    }
}

impl Drop for LibMpvRenderContext {
    fn drop(&mut self) {
        if self.update.is_some() {
            self.set_update_callback(None);
        }
        unsafe { (self.lib.mpv_render_context_free)(self.ctx) };
        self.ctx = ptr::null_mut();
    }
}

