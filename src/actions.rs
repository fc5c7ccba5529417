use log::{info, warn};
use std::process::Command;
use thiserror::Error;

/// Opaque window id as reported by the window system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("{program} failed: {reason}")]
    Command { program: String, reason: String },
    #[error("virtual input device: {0}")]
    Device(String),
    #[error("timed out after {waited_ms}ms waiting for {what}")]
    Timeout { what: String, waited_ms: u64 },
    #[error("clipboard unavailable: {0}")]
    Clipboard(String),
    #[error("unsupported key token: {0}")]
    UnknownKey(String),
}

/// Desktop automation primitives. Every call is blocking.
pub trait ActionSink {
    fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), AutomationError>;
    fn click(&mut self) -> Result<(), AutomationError>;
    /// Single key, e.g. "ENTER" or "L".
    fn press_key(&mut self, key: &str) -> Result<(), AutomationError>;
    /// Keys pressed in order and released in reverse, e.g. ["CTRL", "SHIFT", "S"].
    fn send_hotkey(&mut self, keys: &[&str]) -> Result<(), AutomationError>;
    fn type_text(&mut self, text: &str) -> Result<(), AutomationError>;
    fn clipboard_text(&mut self) -> Result<String, AutomationError>;
    fn foreground_window(&mut self) -> Result<WindowHandle, AutomationError>;
    fn foreground_window_title(&mut self) -> Result<String, AutomationError>;
    fn enumerate_visible_windows(&mut self) -> Result<Vec<(WindowHandle, String)>, AutomationError>;
    fn focus_window(&mut self, window: WindowHandle) -> Result<(), AutomationError>;
}

/// Pointer, buttons and keys through uinput; windows, clipboard and text
/// through xdotool/xclip.
pub struct DesktopSink {
    #[cfg(target_os = "linux")]
    linux: Option<Box<LinuxUinput>>,
}

impl DesktopSink {
    pub fn new(screen: (u32, u32)) -> Result<Self, AutomationError> {
        #[cfg(target_os = "linux")]
        {
            let dev = LinuxUinput::create(screen)?;
            Ok(Self {
                linux: Some(Box::new(dev)),
            })
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = screen;
            Err(AutomationError::Device("uinput is only available on Linux".into()))
        }
    }

    pub fn noop() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            linux: None,
        }
    }

    /// Open the virtual device, or fall back to no-op input with a warning.
    pub fn open_or_noop(screen: (u32, u32)) -> Self {
        Self::new(screen).unwrap_or_else(|e| {
            warn!("uinput unavailable ({e}); pointer and keys run in NO-OP mode");
            Self::noop()
        })
    }
}

impl ActionSink for DesktopSink {
    fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), AutomationError> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.move_abs(x, y)?;
        }
        let _ = (x, y);
        Ok(())
    }

    fn click(&mut self) -> Result<(), AutomationError> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            dev.click_left()?;
        }
        Ok(())
    }

    fn press_key(&mut self, key: &str) -> Result<(), AutomationError> {
        self.send_hotkey(&[key])
    }

    fn send_hotkey(&mut self, keys: &[&str]) -> Result<(), AutomationError> {
        #[cfg(target_os = "linux")]
        if let Some(dev) = self.linux.as_mut() {
            let keys = keys
                .iter()
                .map(|k| map_key(&k.trim().to_ascii_uppercase()))
                .collect::<Result<Vec<_>, _>>()?;
            // press in order
            for k in &keys {
                dev.key_send(*k, 1)?;
            }
            dev.sync()?;
            // release in reverse
            for k in keys.iter().rev() {
                dev.key_send(*k, 0)?;
            }
            dev.sync()?;
        }
        let _ = keys;
        Ok(())
    }

    fn type_text(&mut self, text: &str) -> Result<(), AutomationError> {
        run("xdotool", &["type", "--delay", "12", "--", text]).map(drop)
    }

    fn clipboard_text(&mut self) -> Result<String, AutomationError> {
        run("xclip", &["-selection", "clipboard", "-o"]).map_err(|e| match e {
            AutomationError::Command { reason, .. } => AutomationError::Clipboard(reason),
            other => other,
        })
    }

    fn foreground_window(&mut self) -> Result<WindowHandle, AutomationError> {
        parse_window_id(&run("xdotool", &["getactivewindow"])?)
    }

    fn foreground_window_title(&mut self) -> Result<String, AutomationError> {
        run("xdotool", &["getactivewindow", "getwindowname"])
    }

    fn enumerate_visible_windows(&mut self) -> Result<Vec<(WindowHandle, String)>, AutomationError> {
        // `search` exits non-zero when nothing matches
        let ids = match run("xdotool", &["search", "--onlyvisible", "--name", "."]) {
            Ok(out) => out,
            Err(AutomationError::Command { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut out = Vec::new();
        for line in ids.lines().filter(|l| !l.trim().is_empty()) {
            let handle = parse_window_id(line)?;
            // windows can vanish between search and lookup
            if let Ok(title) = run("xdotool", &["getwindowname", line.trim()]) {
                out.push((handle, title));
            }
        }
        Ok(out)
    }

    fn focus_window(&mut self, window: WindowHandle) -> Result<(), AutomationError> {
        run("xdotool", &["windowactivate", &window.0.to_string()]).map(drop)
    }
}

fn run(program: &str, args: &[&str]) -> Result<String, AutomationError> {
    let out = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| AutomationError::Command {
            program: program.to_string(),
            reason: e.to_string(),
        })?;
    if !out.status.success() {
        return Err(AutomationError::Command {
            program: program.to_string(),
            reason: format!(
                "{} ({})",
                String::from_utf8_lossy(&out.stderr).trim(),
                out.status
            ),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout)
        .trim_end_matches(['\r', '\n'])
        .to_string())
}

fn parse_window_id(s: &str) -> Result<WindowHandle, AutomationError> {
    s.trim()
        .parse::<u64>()
        .map(WindowHandle)
        .map_err(|_| AutomationError::Command {
            program: "xdotool".into(),
            reason: format!("unexpected window id '{}'", s.trim()),
        })
}

/// True when `program` can be spawned from PATH.
pub fn tool_available(program: &str) -> bool {
    Command::new(program).arg("-version").output().is_ok()
}

#[cfg(target_os = "linux")]
fn map_key(tok: &str) -> Result<uinput::event::keyboard::Key, AutomationError> {
    use uinput::event::keyboard::Key as K;
    let k = match tok {
        "CTRL" | "CONTROL" => K::LeftControl,
        "ALT" => K::LeftAlt,
        "SHIFT" => K::LeftShift,
        "SUPER" | "META" | "WIN" => K::LeftMeta,
        "ENTER" | "RETURN" => K::Enter,
        "ESC" | "ESCAPE" => K::Esc,
        "TAB" => K::Tab,
        "SPACE" => K::Space,
        "BACKSPACE" => K::BackSpace,
        "DELETE" | "DEL" => K::Delete,
        "LEFT" => K::Left,
        "RIGHT" => K::Right,
        "UP" => K::Up,
        "DOWN" => K::Down,
        "HOME" => K::Home,
        "END" => K::End,
        "MINUS" | "-" => K::Minus,
        "EQUAL" | "=" => K::Equal,
        "SLASH" | "/" => K::Slash,
        "DOT" | "." => K::Dot,
        "A" => K::A,
        "B" => K::B,
        "C" => K::C,
        "D" => K::D,
        "E" => K::E,
        "F" => K::F,
        "G" => K::G,
        "H" => K::H,
        "I" => K::I,
        "J" => K::J,
        "K" => K::K,
        "L" => K::L,
        "M" => K::M,
        "N" => K::N,
        "O" => K::O,
        "P" => K::P,
        "Q" => K::Q,
        "R" => K::R,
        "S" => K::S,
        "T" => K::T,
        "U" => K::U,
        "V" => K::V,
        "W" => K::W,
        "X" => K::X,
        "Y" => K::Y,
        "Z" => K::Z,
        other => return Err(AutomationError::UnknownKey(other.to_string())),
    };
    Ok(k)
}

#[cfg(target_os = "linux")]
struct LinuxUinput {
    dev: uinput::device::Device,
}

#[cfg(target_os = "linux")]
impl LinuxUinput {
    fn create(screen: (u32, u32)) -> Result<Self, AutomationError> {
        Self::build(screen).map_err(|e| AutomationError::Device(e.to_string()))
    }

    fn build(screen: (u32, u32)) -> Result<Self, uinput::Error> {
        use uinput::event::{Keyboard, absolute, controller::Mouse};

        let dev = uinput::default()?
            .name("handctl virtual input")?
            // absolute pointer spanning the screen
            .event(absolute::Position::X)?
            .min(0)
            .max(screen.0.saturating_sub(1) as i32)
            .event(absolute::Position::Y)?
            .min(0)
            .max(screen.1.saturating_sub(1) as i32)
            .event(Mouse::Left)?
            .event(Mouse::Right)?
            .event(Keyboard::All)?
            .create()?;

        info!("uinput: created virtual device {}x{}", screen.0, screen.1);
        Ok(Self { dev })
    }

    fn sync(&mut self) -> Result<(), AutomationError> {
        self.dev.synchronize().map_err(device_err)
    }

    fn key_send(
        &mut self,
        key: uinput::event::keyboard::Key,
        val: i32,
    ) -> Result<(), AutomationError> {
        self.dev.send(key, val).map_err(device_err)
    }

    fn move_abs(&mut self, x: i32, y: i32) -> Result<(), AutomationError> {
        use uinput::event::absolute::Position;
        self.dev.send(Position::X, x).map_err(device_err)?;
        self.dev.send(Position::Y, y).map_err(device_err)?;
        self.sync()
    }

    fn click_left(&mut self) -> Result<(), AutomationError> {
        use uinput::event::controller::Mouse;
        self.dev.send(Mouse::Left, 1).map_err(device_err)?;
        self.sync()?;
        self.dev.send(Mouse::Left, 0).map_err(device_err)?;
        self.sync()
    }
}

#[cfg(target_os = "linux")]
fn device_err(e: uinput::Error) -> AutomationError {
    AutomationError::Device(e.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        Move(i32, i32),
        Click,
        Key(String),
        Hotkey(Vec<String>),
        Type(String),
        Focus(WindowHandle),
    }

    /// In-memory sink: records actions, serves scripted window state.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub calls: Vec<Call>,
        pub clipboard: String,
        pub windows: Vec<(WindowHandle, String)>,
        pub foreground: Option<WindowHandle>,
        pub title: String,
        /// Titles served (and then kept) by successive title queries.
        pub upcoming_titles: VecDeque<String>,
        /// Operation name that should fail: "move", "click", "key", "hotkey",
        /// "type", "clipboard", "title", "focus".
        pub fail_on: Option<&'static str>,
    }

    impl RecordingSink {
        pub fn with_title(title: &str) -> Self {
            Self {
                title: title.to_string(),
                ..Self::default()
            }
        }

        fn check(&self, op: &str) -> Result<(), AutomationError> {
            if self.fail_on == Some(op) {
                return Err(AutomationError::Device(format!("injected {op} failure")));
            }
            Ok(())
        }

        pub fn typed(&self) -> Vec<&str> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Type(t) => Some(t.as_str()),
                    _ => None,
                })
                .collect()
        }
    }

    pub fn hotkey(keys: &[&str]) -> Call {
        Call::Hotkey(keys.iter().map(|k| k.to_string()).collect())
    }

    impl ActionSink for RecordingSink {
        fn move_pointer(&mut self, x: i32, y: i32) -> Result<(), AutomationError> {
            self.check("move")?;
            self.calls.push(Call::Move(x, y));
            Ok(())
        }

        fn click(&mut self) -> Result<(), AutomationError> {
            self.check("click")?;
            self.calls.push(Call::Click);
            Ok(())
        }

        fn press_key(&mut self, key: &str) -> Result<(), AutomationError> {
            self.check("key")?;
            self.calls.push(Call::Key(key.to_string()));
            Ok(())
        }

        fn send_hotkey(&mut self, keys: &[&str]) -> Result<(), AutomationError> {
            self.check("hotkey")?;
            self.calls.push(hotkey(keys));
            Ok(())
        }

        fn type_text(&mut self, text: &str) -> Result<(), AutomationError> {
            self.check("type")?;
            self.calls.push(Call::Type(text.to_string()));
            Ok(())
        }

        fn clipboard_text(&mut self) -> Result<String, AutomationError> {
            self.check("clipboard")?;
            Ok(self.clipboard.clone())
        }

        fn foreground_window(&mut self) -> Result<WindowHandle, AutomationError> {
            Ok(self.foreground.unwrap_or(WindowHandle(1)))
        }

        fn foreground_window_title(&mut self) -> Result<String, AutomationError> {
            self.check("title")?;
            if let Some(next) = self.upcoming_titles.pop_front() {
                self.title = next;
            }
            Ok(self.title.clone())
        }

        fn enumerate_visible_windows(
            &mut self,
        ) -> Result<Vec<(WindowHandle, String)>, AutomationError> {
            Ok(self.windows.clone())
        }

        fn focus_window(&mut self, window: WindowHandle) -> Result<(), AutomationError> {
            self.check("focus")?;
            self.calls.push(Call::Focus(window));
            self.foreground = Some(window);
            if let Some((_, t)) = self.windows.iter().find(|(h, _)| *h == window) {
                self.title = t.clone();
            }
            Ok(())
        }
    }
}
