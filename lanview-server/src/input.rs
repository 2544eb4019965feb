//! Win32 `SendInput` mouse and keyboard injection.
//!
//! Replays controller intents into the local input stream. Key names
//! follow the robotjs naming used by existing clients.
//!
//! # Platform
//!
//! Windows-only. On other platforms the actuator is defined but every
//! action returns [`RemoteError::Input`].

use async_trait::async_trait;
use lanview_core::{InputActuator, KeyboardIntent, MouseIntent, RemoteError};

// ── Key names ────────────────────────────────────────────────────

/// Map a key name onto a Windows virtual-key code.
///
/// Letters and digits map to their ASCII code; anything else single
/// character returns `None` and is typed as Unicode instead.
pub fn virtual_key(name: &str) -> Option<u16> {
    let lower = name.to_ascii_lowercase();
    let vk = match lower.as_str() {
        "backspace" => 0x08,
        "tab" => 0x09,
        "enter" => 0x0D,
        "shift" => 0x10,
        "control" => 0x11,
        "alt" => 0x12,
        "escape" => 0x1B,
        "space" => 0x20,
        "pageup" => 0x21,
        "pagedown" => 0x22,
        "end" => 0x23,
        "home" => 0x24,
        "left" => 0x25,
        "up" => 0x26,
        "right" => 0x27,
        "down" => 0x28,
        "printscreen" => 0x2C,
        "insert" => 0x2D,
        "delete" => 0x2E,
        "command" => 0x5B,
        "right_shift" => 0xA1,
        "audio_mute" => 0xAD,
        "audio_vol_down" => 0xAE,
        "audio_vol_up" => 0xAF,
        "audio_next" => 0xB0,
        "audio_prev" => 0xB1,
        "audio_stop" => 0xB2,
        "audio_play" | "audio_pause" => 0xB3,
        f if f.len() > 1 && f.starts_with('f') => {
            let n: u16 = f[1..].parse().ok()?;
            if !(1..=24).contains(&n) {
                return None;
            }
            0x70 + n - 1
        }
        other => {
            let mut chars = other.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => c.to_ascii_uppercase() as u16,
                _ => return None,
            }
        }
    };
    Some(vk)
}

// ── SendInputActuator ────────────────────────────────────────────

/// Default [`InputActuator`] for the server binary.
#[derive(Debug, Default)]
pub struct SendInputActuator;

impl SendInputActuator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl InputActuator for SendInputActuator {
    async fn mouse(&self, intent: &MouseIntent) -> Result<(), RemoteError> {
        platform::inject_mouse(intent)
    }

    async fn keyboard(&self, intent: &KeyboardIntent) -> Result<(), RemoteError> {
        platform::inject_keyboard(intent)
    }
}

// ── Windows implementation ───────────────────────────────────────

#[cfg(target_os = "windows")]
mod platform {
    use super::*;
    use lanview_core::MouseButton;
    use windows::Win32::Foundation::POINT;
    use windows::Win32::UI::Input::KeyboardAndMouse::*;
    use windows::Win32::UI::WindowsAndMessaging::{
        GetCursorPos, GetSystemMetrics, SM_CXSCREEN, SM_CYSCREEN, SetCursorPos,
    };

    fn send(inputs: &[INPUT], what: &str) -> Result<(), RemoteError> {
        let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
        if sent as usize != inputs.len() {
            return Err(RemoteError::Input(format!("SendInput ({what}) sent {sent}/{}", inputs.len())));
        }
        Ok(())
    }

    fn mouse_input(flags: MOUSE_EVENT_FLAGS, data: i32) -> INPUT {
        INPUT {
            r#type: INPUT_MOUSE,
            Anonymous: INPUT_0 {
                mi: MOUSEINPUT {
                    dx: 0,
                    dy: 0,
                    mouseData: data as u32,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn key_input(vk: u16, scan: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
        INPUT {
            r#type: INPUT_KEYBOARD,
            Anonymous: INPUT_0 {
                ki: KEYBDINPUT {
                    wVk: VIRTUAL_KEY(vk),
                    wScan: scan,
                    dwFlags: flags,
                    time: 0,
                    dwExtraInfo: 0,
                },
            },
        }
    }

    fn button_flags(button: MouseButton) -> (MOUSE_EVENT_FLAGS, MOUSE_EVENT_FLAGS) {
        match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        }
    }

    fn screen_size() -> Result<(u32, u32), RemoteError> {
        let (w, h) = unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        if w <= 0 || h <= 0 {
            return Err(RemoteError::Input("GetSystemMetrics returned 0".into()));
        }
        Ok((w as u32, h as u32))
    }

    fn cursor() -> Result<(i32, i32), RemoteError> {
        let mut p = POINT::default();
        unsafe { GetCursorPos(&mut p) }
            .map_err(|e| RemoteError::Input(format!("GetCursorPos failed: {e}")))?;
        Ok((p.x, p.y))
    }

    pub(super) fn inject_mouse(intent: &MouseIntent) -> Result<(), RemoteError> {
        match intent {
            MouseIntent::Move(mv) => {
                let (x, y) = mv.resolve(screen_size()?, cursor()?);
                unsafe { SetCursorPos(x, y) }
                    .map_err(|e| RemoteError::Input(format!("SetCursorPos failed: {e}")))
            }
            MouseIntent::Click { button, double } => {
                let (down, up) = button_flags(*button);
                let mut inputs = vec![mouse_input(down, 0), mouse_input(up, 0)];
                if *double {
                    inputs.extend([mouse_input(down, 0), mouse_input(up, 0)]);
                }
                send(&inputs, "click")
            }
            MouseIntent::Scroll { .. } | MouseIntent::Zoom { .. } => {
                let Some((dx, dy)) = intent.scroll_steps() else {
                    return Ok(());
                };
                let mut inputs = Vec::with_capacity(2);
                if dy != 0 {
                    inputs.push(mouse_input(MOUSEEVENTF_WHEEL, dy));
                }
                if dx != 0 {
                    inputs.push(mouse_input(MOUSEEVENTF_HWHEEL, dx));
                }
                send(&inputs, "scroll")
            }
            MouseIntent::DragStart { button } => send(&[mouse_input(button_flags(*button).0, 0)], "drag start"),
            MouseIntent::DragEnd { button } => send(&[mouse_input(button_flags(*button).1, 0)], "drag end"),
            MouseIntent::Unsupported => Ok(()),
        }
    }

    fn vk_for(key: &str) -> Result<u16, RemoteError> {
        virtual_key(key).ok_or_else(|| RemoteError::Input(format!("unknown key {key:?}")))
    }

    pub(super) fn inject_keyboard(intent: &KeyboardIntent) -> Result<(), RemoteError> {
        let none = KEYBD_EVENT_FLAGS(0);
        match intent {
            KeyboardIntent::Press { key, modifiers } => {
                let vk = vk_for(key)?;
                let mods = modifiers
                    .iter()
                    .map(|m| vk_for(m))
                    .collect::<Result<Vec<_>, _>>()?;
                let mut inputs: Vec<INPUT> = mods.iter().map(|&m| key_input(m, 0, none)).collect();
                inputs.push(key_input(vk, 0, none));
                inputs.push(key_input(vk, 0, KEYEVENTF_KEYUP));
                inputs.extend(mods.iter().rev().map(|&m| key_input(m, 0, KEYEVENTF_KEYUP)));
                send(&inputs, "key press")
            }
            KeyboardIntent::Down { key } => send(&[key_input(vk_for(key)?, 0, none)], "key down"),
            KeyboardIntent::Up { key } => {
                send(&[key_input(vk_for(key)?, 0, KEYEVENTF_KEYUP)], "key up")
            }
            KeyboardIntent::Type { text } => {
                let inputs: Vec<INPUT> = text
                    .encode_utf16()
                    .flat_map(|unit| {
                        [
                            key_input(0, unit, KEYEVENTF_UNICODE),
                            key_input(0, unit, KEYEVENTF_UNICODE | KEYEVENTF_KEYUP),
                        ]
                    })
                    .collect();
                if inputs.is_empty() {
                    return Ok(());
                }
                send(&inputs, "type")
            }
            KeyboardIntent::Unsupported => Ok(()),
        }
    }
}

// ── Non-Windows stub ─────────────────────────────────────────────

#[cfg(not(target_os = "windows"))]
mod platform {
    use super::*;

    pub(super) fn inject_mouse(_intent: &MouseIntent) -> Result<(), RemoteError> {
        Err(RemoteError::Input(
            "input injection is only available on Windows".into(),
        ))
    }

    pub(super) fn inject_keyboard(_intent: &KeyboardIntent) -> Result<(), RemoteError> {
        Err(RemoteError::Input(
            "input injection is only available on Windows".into(),
        ))
    }
}

// ── Tests ────────────────────────────────────────────────────────
