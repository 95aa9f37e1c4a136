//! Win32 implementation of [`WindowManager`] on top of the `windows` crate.
//!
//! ## Container window
//!
//! - Popup, no caption, `WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE |
//!   WS_EX_NOREDIRECTIONBITMAP`, DWM transitions disabled, taskbar tab removed.
//! - **WM_ERASEBKGND**: suppressed, the engine paints everything.
//! - **WM_MOUSEMOVE / WM_SIZE / WM_MOVE / WM_MOVING / WM_ACTIVATE /
//!   WM_WINDOWPOSCHANGED**: forwarded to the [`ContainerEventHandler`].
//! - **WM_NCDESTROY**: frees the handler.
//!
//! Host messages are not intercepted here; the host feeds its own top-level
//! window procedure through [`host_window_event`].

use std::{
    ffi::c_void,
    mem,
    sync::Once,
};

use log::{debug, error, info, warn};
use windows::{
    Win32::{
        Foundation::{BOOL, GetLastError, HWND, LPARAM, LRESULT, POINT, RECT, WPARAM},
        Graphics::{
            Dwm::{DWMWA_TRANSITIONS_FORCEDISABLED, DwmFlush, DwmSetWindowAttribute},
            Gdi::{BLACK_BRUSH, ClientToScreen, GetStockObject, HBRUSH, RDW_ALLCHILDREN, RDW_INVALIDATE, RDW_UPDATENOW, RedrawWindow},
        },
        System::{
            Com::{CLSCTX_INPROC_SERVER, COINIT_APARTMENTTHREADED, CoCreateInstance, CoInitializeEx},
            LibraryLoader::{GetModuleHandleW, GetProcAddress},
        },
        UI::{
            Input::KeyboardAndMouse::SetFocus,
            Shell::{ITaskbarList, TaskbarList},
            WindowsAndMessaging::{
                CS_HREDRAW, CS_VREDRAW, CreateWindowExW, DefWindowProcW, DestroyWindow, GWL_EXSTYLE, GWL_STYLE,
                GWLP_USERDATA, GetWindowLongPtrW, GetWindowRect, IDC_ARROW, LoadCursorW, MoveWindow, PostMessageW,
                RegisterClassExW, SIZE_MAXIMIZED, SIZE_MINIMIZED, SW_HIDE, SW_SHOWNOACTIVATE, SWP_FRAMECHANGED,
                SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SWP_NOZORDER, SetForegroundWindow, SetParent,
                SetWindowLongPtrW, SetWindowPos, ShowWindow, WINDOW_EX_STYLE, WM_ACTIVATE, WM_CLOSE, WM_ERASEBKGND,
                WM_MOUSEMOVE, WM_MOVE, WM_MOVING, WM_NCDESTROY, WM_SIZE, WM_WINDOWPOSCHANGED, WNDCLASSEXW,
                WS_CAPTION, WS_CHILD, WS_CLIPCHILDREN, WS_EX_APPWINDOW, WS_EX_LAYERED, WS_EX_NOACTIVATE,
                WS_EX_NOREDIRECTIONBITMAP, WS_EX_TOOLWINDOW, WS_EX_TRANSPARENT, WS_MAXIMIZEBOX, WS_MINIMIZEBOX,
                WS_POPUP, WS_THICKFRAME,
            },
        },
    },
    core::{PCWSTR, s, w},
};

use super::manager::{ContainerEvent, ContainerEventHandler, HostWindowEvent, Rect, SizeKind, WindowManager};
use crate::{
    constants::{CONTAINER_CLASS_NAME, ENGINE_WINDOW_CLASS_NAME},
    error::BridgeError,
    handles::{OwnedWindow, WindowRef},
};

/// `ACCENT_ENABLE_TRANSPARENTGRADIENT`; 0 disables the accent.
const ACCENT_TRANSPARENT: u32 = 2;
const ACCENT_DISABLED: u32 = 0;
const WCA_ACCENT_POLICY: u32 = 19;

#[repr(C)]
struct AccentPolicy {
    accent_state: u32,
    accent_flags: u32,
    gradient_color: u32,
    animation_id: u32,
}

#[repr(C)]
struct WindowCompositionAttribData {
    attrib: u32,
    data: *mut c_void,
    size: usize,
}

type SetWindowCompositionAttributeFn = unsafe extern "system" fn(HWND, *mut WindowCompositionAttribData) -> BOOL;

fn hwnd(window: WindowRef) -> HWND {
    HWND(window.raw() as *mut c_void)
}

fn window_ref(hwnd: HWND) -> WindowRef {
    WindowRef::from_raw(hwnd.0 as isize)
}

fn platform(what: &str, e: windows::core::Error) -> BridgeError {
    BridgeError::Platform(format!("{what}: {e}"))
}

fn from_rect(r: RECT) -> Rect {
    Rect::new(r.left, r.top, r.right, r.bottom)
}

/// Translates a host top-level window message into the events the bridge
/// reacts to.
pub fn host_window_event(message: u32, wparam: WPARAM) -> Option<HostWindowEvent> {
    match message {
        WM_ACTIVATE => Some(HostWindowEvent::Activated),
        WM_SIZE => Some(HostWindowEvent::Size(match wparam.0 as u32 {
            SIZE_MINIMIZED => SizeKind::Minimized,
            SIZE_MAXIMIZED => SizeKind::Maximized,
            _ => SizeKind::Restored,
        })),
        WM_MOVE | WM_MOVING | WM_WINDOWPOSCHANGED => Some(HostWindowEvent::Moved),
        WM_CLOSE => Some(HostWindowEvent::Close),
        _ => None,
    }
}

/// Boxed into `GWLP_USERDATA` of the container.
struct ContainerData {
    on_event: ContainerEventHandler,
}

unsafe extern "system" fn container_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe {
        let data = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *mut ContainerData;
        let event = match msg {
            WM_ERASEBKGND => return LRESULT(1),
            WM_NCDESTROY => {
                if !data.is_null() {
                    SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
                    drop(Box::from_raw(data));
                    debug!("[Win32WindowManager] container handler freed");
                }
                None
            }
            WM_MOUSEMOVE => Some(ContainerEvent::MouseMove),
            WM_SIZE => Some(ContainerEvent::Sized),
            WM_MOVE | WM_MOVING | WM_WINDOWPOSCHANGED => Some(ContainerEvent::Moved),
            WM_ACTIVATE => Some(ContainerEvent::Activated),
            _ => None,
        };
        if let (Some(event), Some(data)) = (event, data.as_ref()) {
            (data.on_event)(event);
        }
        DefWindowProcW(hwnd, msg, wparam, lparam)
    }
}

unsafe extern "system" fn video_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe {
        if msg == WM_ERASEBKGND {
            return LRESULT(1);
        }
        DefWindowProcW(hwnd, msg, wparam, lparam)
    }
}

static REGISTER_CLASSES_ONCE: Once = Once::new();

fn register_window_classes() {
    REGISTER_CLASSES_ONCE.call_once(|| unsafe {
        let instance = match GetModuleHandleW(PCWSTR::null()) {
            Ok(module) => module.into(),
            Err(e) => {
                error!("[Win32WindowManager] GetModuleHandleW failed: {}", e);
                return;
            }
        };
        let background = HBRUSH(GetStockObject(BLACK_BRUSH).0);
        for (class_name, proc) in [
            (CONTAINER_CLASS_NAME, container_proc as unsafe extern "system" fn(_, _, _, _) -> _),
            (ENGINE_WINDOW_CLASS_NAME, video_proc),
        ] {
            let wc = WNDCLASSEXW {
                cbSize: mem::size_of::<WNDCLASSEXW>() as u32,
                style: CS_HREDRAW | CS_VREDRAW,
                lpfnWndProc: Some(proc),
                hInstance: instance,
                hCursor: LoadCursorW(None, IDC_ARROW).unwrap_or_default(),
                hbrBackground: background,
                lpszClassName: class_name,
                ..Default::default()
            };
            if RegisterClassExW(&wc) == 0 {
                error!("[Win32WindowManager] RegisterClassExW failed: {:?}", GetLastError());
            }
        }
        info!("[Win32WindowManager] Window classes registered");
    });
}

/// Real window manager. All calls must come from the thread that owns the
/// host window.
#[derive(Debug, Default)]
pub struct Win32WindowManager {
    _private: (),
}

impl Win32WindowManager {
    pub fn new() -> Self {
        register_window_classes();
        Self { _private: () }
    }

    fn create_window(
        &self,
        ex_style: WINDOW_EX_STYLE,
        class_name: PCWSTR,
        title: PCWSTR,
    ) -> Result<OwnedWindow, BridgeError> {
        unsafe {
            let instance = GetModuleHandleW(PCWSTR::null()).map_err(|e| platform("GetModuleHandleW", e))?;
            let created = CreateWindowExW(
                ex_style,
                class_name,
                title,
                WS_POPUP | WS_CLIPCHILDREN,
                0,
                0,
                100,
                100,
                None,
                None,
                Some(instance.into()),
                None,
            )
            .map_err(|e| platform("CreateWindowExW", e))?;
            Ok(OwnedWindow::adopt_created(window_ref(created)))
        }
    }

    fn set_composition_accent(&self, host: HWND, accent_state: u32) -> Result<(), BridgeError> {
        unsafe {
            let user32 = GetModuleHandleW(w!("user32.dll")).map_err(|e| platform("GetModuleHandleW(user32)", e))?;
            let Some(proc) = GetProcAddress(user32, s!("SetWindowCompositionAttribute")) else {
                return Err(BridgeError::Platform("SetWindowCompositionAttribute unavailable".to_string()));
            };
            let set_attribute: SetWindowCompositionAttributeFn = mem::transmute(proc);
            let mut policy = AccentPolicy { accent_state, accent_flags: 0, gradient_color: 0, animation_id: 0 };
            let mut data = WindowCompositionAttribData {
                attrib: WCA_ACCENT_POLICY,
                data: &mut policy as *mut AccentPolicy as *mut c_void,
                size: mem::size_of::<AccentPolicy>(),
            };
            if set_attribute(host, &mut data).as_bool() {
                Ok(())
            } else {
                Err(BridgeError::Platform(format!("SetWindowCompositionAttribute: {:?}", GetLastError())))
            }
        }
    }
}

fn remove_taskbar_tab(window: HWND) -> windows::core::Result<()> {
    unsafe {
        // S_FALSE / RPC_E_CHANGED_MODE just mean COM was already set up.
        let _ = CoInitializeEx(None, COINIT_APARTMENTTHREADED);
        let taskbar: ITaskbarList = CoCreateInstance(&TaskbarList, None, CLSCTX_INPROC_SERVER)?;
        taskbar.HrInit()?;
        taskbar.DeleteTab(window)
    }
}

impl WindowManager for Win32WindowManager {
    fn window_rect(&self, window: WindowRef) -> Option<Rect> {
        let mut rc = RECT::default();
        unsafe { GetWindowRect(hwnd(window), &mut rc) }.ok()?;
        Some(from_rect(rc))
    }

    fn client_origin(&self, window: WindowRef) -> Option<(i32, i32)> {
        let mut origin = POINT::default();
        if unsafe { ClientToScreen(hwnd(window), &mut origin) }.as_bool() {
            Some((origin.x, origin.y))
        } else {
            None
        }
    }

    fn create_container(&self, host: WindowRef, on_event: ContainerEventHandler) -> Result<OwnedWindow, BridgeError> {
        let container = self.create_window(
            WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE | WS_EX_NOREDIRECTIONBITMAP,
            CONTAINER_CLASS_NAME,
            w!("media container"),
        )?;
        let raw = hwnd(container.window());
        unsafe {
            let data = Box::into_raw(Box::new(ContainerData { on_event }));
            SetWindowLongPtrW(raw, GWLP_USERDATA, data as isize);

            let disable = BOOL::from(true);
            if let Err(e) = DwmSetWindowAttribute(
                raw,
                DWMWA_TRANSITIONS_FORCEDISABLED,
                &disable as *const BOOL as *const c_void,
                mem::size_of::<BOOL>() as u32,
            ) {
                warn!("[Win32WindowManager] disabling transitions failed: {}", e);
            }
        }
        if let Err(e) = remove_taskbar_tab(raw) {
            warn!("[Win32WindowManager] removing taskbar tab failed: {}", e);
        }
        info!("[Win32WindowManager] Container {:?} created for host {:?}", container.window(), host);
        Ok(container)
    }

    fn create_engine_window(&self) -> Result<OwnedWindow, BridgeError> {
        let window = self.create_window(WINDOW_EX_STYLE::default(), ENGINE_WINDOW_CLASS_NAME, w!("media video"))?;
        debug!("[Win32WindowManager] Engine window {:?} created", window.window());
        Ok(window)
    }

    fn destroy_window(&self, window: OwnedWindow) {
        let raw = window.release();
        if let Err(e) = unsafe { DestroyWindow(hwnd(raw)) } {
            warn!("[Win32WindowManager] DestroyWindow({:?}) failed: {}", raw, e);
        }
    }

    fn adopt(&self, child: WindowRef, parent: WindowRef) -> Result<(), BridgeError> {
        let child = hwnd(child);
        unsafe {
            let old = GetWindowLongPtrW(child, GWL_STYLE);
            let stripped = (WS_CAPTION | WS_THICKFRAME | WS_MINIMIZEBOX | WS_MAXIMIZEBOX | WS_POPUP).0 as isize;
            let new = (old & !stripped) | WS_CHILD.0 as isize;
            SetWindowLongPtrW(child, GWL_STYLE, new);
            let ex = GetWindowLongPtrW(child, GWL_EXSTYLE);
            SetWindowLongPtrW(child, GWL_EXSTYLE, ex & !(WS_EX_APPWINDOW.0 as isize));
            debug!("[Win32WindowManager] child style {:#x} -> {:#x}", old, new);
            SetParent(child, Some(hwnd(parent))).map_err(|e| platform("SetParent", e))?;
        }
        Ok(())
    }

    fn place_behind(&self, window: WindowRef, host: WindowRef, rect: Rect) -> Result<(), BridgeError> {
        unsafe {
            SetWindowPos(
                hwnd(window),
                Some(hwnd(host)),
                rect.left,
                rect.top,
                rect.width(),
                rect.height(),
                SWP_NOACTIVATE,
            )
        }
        .map_err(|e| platform("SetWindowPos", e))
    }

    fn move_window(&self, window: WindowRef, rect: Rect) -> Result<(), BridgeError> {
        unsafe { MoveWindow(hwnd(window), rect.left, rect.top, rect.width(), rect.height(), true) }
            .map_err(|e| platform("MoveWindow", e))
    }

    fn set_shown(&self, window: WindowRef, shown: bool) -> Result<(), BridgeError> {
        // The return value is the previous visibility, not a status.
        let _ = unsafe { ShowWindow(hwnd(window), if shown { SW_SHOWNOACTIVATE } else { SW_HIDE }) };
        Ok(())
    }

    fn set_composition(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError> {
        self.set_composition_accent(hwnd(host), if enabled { ACCENT_TRANSPARENT } else { ACCENT_DISABLED })
    }

    fn refresh_frame(&self, window: WindowRef) -> Result<(), BridgeError> {
        unsafe {
            SetWindowPos(
                hwnd(window),
                None,
                0,
                0,
                0,
                0,
                SWP_FRAMECHANGED | SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
            )
        }
        .map_err(|e| platform("SetWindowPos(SWP_FRAMECHANGED)", e))
    }

    fn flush_composition(&self) -> Result<(), BridgeError> {
        unsafe { DwmFlush() }.map_err(|e| platform("DwmFlush", e))
    }

    fn redraw(&self, window: WindowRef) -> Result<(), BridgeError> {
        let ok = unsafe {
            RedrawWindow(Some(hwnd(window)), None, None, RDW_INVALIDATE | RDW_UPDATENOW | RDW_ALLCHILDREN)
        };
        if ok.as_bool() { Ok(()) } else { Err(BridgeError::Platform("RedrawWindow failed".to_string())) }
    }

    fn set_input_passthrough(&self, host: WindowRef, enabled: bool) -> Result<(), BridgeError> {
        let raw = hwnd(host);
        let flags = (WS_EX_TRANSPARENT | WS_EX_LAYERED).0 as isize;
        unsafe {
            let ex = GetWindowLongPtrW(raw, GWL_EXSTYLE);
            let new = if enabled { ex | flags } else { ex & !flags };
            if new == ex {
                return Ok(());
            }
            SetWindowLongPtrW(raw, GWL_EXSTYLE, new);
        }
        self.refresh_frame(host)?;
        self.flush_composition()
    }

    fn focus(&self, window: WindowRef) -> Result<(), BridgeError> {
        unsafe {
            if !SetForegroundWindow(hwnd(window)).as_bool() {
                SetFocus(Some(hwnd(window))).map_err(|e| platform("SetFocus", e))?;
            }
        }
        Ok(())
    }

    fn close(&self, window: WindowRef) -> Result<(), BridgeError> {
        unsafe { PostMessageW(Some(hwnd(window)), WM_CLOSE, WPARAM(0), LPARAM(0)) }
            .map_err(|e| platform("PostMessageW(WM_CLOSE)", e))
    }
}
