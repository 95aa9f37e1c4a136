/// Environment variable pointing at a JSON `BridgeConfig` file.
pub const CONFIG_ENV_VAR: &str = "MEDIA_BRIDGE_CONFIG";

/// Quiet interval before compositing resumes after a window animation.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 300;

/// Rectangle the engine window gets before the host sends its first `setVideoRect`.
pub const DEFAULT_VIDEO_RECT: (i32, i32, i32, i32) = (0, 0, 100, 100);

/// Property observed internally to report whether current content is HDR.
pub const SIG_PEAK_PROPERTY: &str = "video-params/sig-peak";

/// Pseudo-property the bridge intercepts instead of forwarding.
pub const HDR_PROPERTY: &str = "hdr-enabled";

/// Engine property toggled by the HDR pseudo-property.
pub const COLORSPACE_HINT_PROPERTY: &str = "target-colorspace-hint";

/// Options seeded at init when HDR output is on: passthrough, with tone-mapping
/// for displays that cannot show it.
pub const HDR_OUTPUT_OPTIONS: &[(&str, &str)] =
    &[(COLORSPACE_HINT_PROPERTY, "yes"), ("tone-mapping", "auto"), ("hdr-compute-peak", "auto")];

/// Engine shared library names probed when no explicit path is configured.
#[cfg(target_os = "windows")]
pub const ENGINE_LIBRARY_NAMES: &[&str] = &["libmpv-2.dll", "mpv-2.dll", "mpv-1.dll"];
#[cfg(target_os = "macos")]
pub const ENGINE_LIBRARY_NAMES: &[&str] = &["libmpv.2.dylib", "libmpv.dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const ENGINE_LIBRARY_NAMES: &[&str] = &["libmpv.so.2", "libmpv.so"];

/// EGL library names probed by the GL backend.
#[cfg(target_os = "windows")]
pub const EGL_LIBRARY_NAMES: &[&str] = &["libEGL.dll"];
#[cfg(not(target_os = "windows"))]
pub const EGL_LIBRARY_NAMES: &[&str] = &["libEGL.so.1", "libEGL.so"];

/// Window class registered for the hidden container window.
#[cfg(windows)]
pub const CONTAINER_CLASS_NAME: windows::core::PCWSTR = windows::core::w!("MEDIA_RENDER_BRIDGE_CONTAINER");

/// Window class registered for the engine's own child window.
#[cfg(windows)]
pub const ENGINE_WINDOW_CLASS_NAME: windows::core::PCWSTR = windows::core::w!("MEDIA_RENDER_BRIDGE_VIDEO");
