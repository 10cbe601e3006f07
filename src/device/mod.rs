#[cfg(feature = "clipboard")]
pub mod clipboard;
#[cfg(feature = "x11")]
pub mod x11;

use anyhow::{anyhow, Result};

use crate::model::{KeyState, Point};

/// The primitives the engine consumes from the target surface.
///
/// Implementations post events immediately and in call order; the engine does all
/// pacing and never calls into a surface from more than one place at a time.
pub trait Surface {
    /// Press or release a key by Linux evdev keycode.
    fn key(&mut self, keycode: u32, state: KeyState) -> Result<()>;

    /// Enter one character without a keycode mapping (fallback path).
    fn type_literal(&mut self, c: char) -> Result<()> {
        Err(anyhow!("literal entry of {c:?} is not supported by this surface"))
    }

    fn move_pointer(&mut self, to: Point) -> Result<()>;

    /// Left click at the current pointer position.
    fn click(&mut self) -> Result<()>;

    fn pointer_position(&mut self) -> Result<Point>;

    /// Current payload of the content channel (clipboard or equivalent);
    /// `None` when it holds no text.
    fn read_content(&mut self) -> Result<Option<String>>;

    fn clear_content(&mut self) -> Result<()>;
}

impl<S: Surface + ?Sized> Surface for Box<S> {
    fn key(&mut self, keycode: u32, state: KeyState) -> Result<()> {
        (**self).key(keycode, state)
    }

    fn type_literal(&mut self, c: char) -> Result<()> {
        (**self).type_literal(c)
    }

    fn move_pointer(&mut self, to: Point) -> Result<()> {
        (**self).move_pointer(to)
    }

    fn click(&mut self) -> Result<()> {
        (**self).click()
    }

    fn pointer_position(&mut self) -> Result<Point> {
        (**self).pointer_position()
    }

    fn read_content(&mut self) -> Result<Option<String>> {
        (**self).read_content()
    }

    fn clear_content(&mut self) -> Result<()> {
        (**self).clear_content()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Auto,
    X11,
}

fn env_is_set(name: &str) -> bool {
    std::env::var_os(name)
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

fn session_description() -> String {
    let xdg_session_type = std::env::var("XDG_SESSION_TYPE").unwrap_or_default();

    let mut parts = Vec::new();
    for name in ["WAYLAND_DISPLAY", "WAYLAND_SOCKET", "DISPLAY"] {
        if env_is_set(name) {
            parts.push(format!("{name} is set"));
        }
    }
    if !xdg_session_type.is_empty() {
        parts.push(format!("XDG_SESSION_TYPE={xdg_session_type}"));
    }

    if parts.is_empty() {
        "No display session detected (expected an X11 DISPLAY).".to_string()
    } else {
        format!("Detected environment: {}", parts.join(", "))
    }
}

/// Pick a backend for the current environment.
///
/// Pointer synthesis and clipboard capture both need an X server; a Wayland session
/// works only through Xwayland, i.e. when `DISPLAY` is also set.
pub fn resolve_backend(requested: Backend) -> Result<Backend> {
    let x11_env = env_is_set("DISPLAY");
    let wayland_env = env_is_set("WAYLAND_DISPLAY") || env_is_set("WAYLAND_SOCKET");

    let how = match requested {
        Backend::Auto => "detected",
        Backend::X11 => "requested",
    };

    if !x11_env {
        let hint = if wayland_env {
            "Wayland without Xwayland is not supported: pointer and clipboard access need an X11 DISPLAY."
        } else {
            "Run inside an X11 session or set DISPLAY."
        };
        return Err(anyhow!(
            "No supported input backend {how}. {details}\n{hint}",
            details = session_description()
        ));
    }

    if !cfg!(feature = "x11") {
        return Err(anyhow!(
            "X11 backend {how} but is disabled in this build. (Rebuild with `--features x11`.) {details}",
            details = session_description()
        ));
    }

    Ok(Backend::X11)
}

/// Keyboard and pointer from the input backend, content capture from the
/// system clipboard.
#[cfg(all(feature = "x11", feature = "clipboard"))]
pub struct DesktopSurface {
    input: x11::X11Input,
    clipboard: clipboard::ClipboardChannel,
}

#[cfg(all(feature = "x11", feature = "clipboard"))]
impl Surface for DesktopSurface {
    fn key(&mut self, keycode: u32, state: KeyState) -> Result<()> {
        self.input.key(keycode, state)
    }

    fn type_literal(&mut self, c: char) -> Result<()> {
        self.input.type_literal(c)
    }

    fn move_pointer(&mut self, to: Point) -> Result<()> {
        self.input.move_pointer(to)
    }

    fn click(&mut self) -> Result<()> {
        self.input.click()
    }

    fn pointer_position(&mut self) -> Result<Point> {
        self.input.pointer_position()
    }

    fn read_content(&mut self) -> Result<Option<String>> {
        self.clipboard.read()
    }

    fn clear_content(&mut self) -> Result<()> {
        self.clipboard.clear()
    }
}

pub fn open_surface(requested: Backend) -> Result<Box<dyn Surface>> {
    let backend = resolve_backend(requested)?;

    match backend {
        Backend::X11 => {
            #[cfg(all(feature = "x11", feature = "clipboard"))]
            {
                let input = x11::X11Input::connect()?;
                let clipboard = clipboard::ClipboardChannel::open()?;
                Ok(Box::new(DesktopSurface { input, clipboard }))
            }

            #[cfg(not(all(feature = "x11", feature = "clipboard")))]
            {
                Err(anyhow!(
                    "desktop typing needs both the `x11` and `clipboard` features (rebuild with default features)."
                ))
            }
        }
        Backend::Auto => Err(anyhow!("no backend resolved")),
    }
}
