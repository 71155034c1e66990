//! Virtual-key codes, hotkey parsing and modifier snapshots.
//!
//! Everything is expressed in Windows virtual-key codes so that the three
//! interception points compare like with like; winit key codes are mapped
//! onto them for the portable path.

use winit::keyboard::{KeyCode, ModifiersState};

use crate::config::LockdownConfig;
use crate::error::{HostError, Result};

pub const VK_SHIFT: u32 = 0x10;
pub const VK_CONTROL: u32 = 0x11;
pub const VK_MENU: u32 = 0x12;
pub const VK_F1: u32 = 0x70;
pub const VK_F4: u32 = 0x73;
pub const VK_F12: u32 = 0x7B;
pub const VK_F24: u32 = 0x87;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modifier {
    Ctrl,
    Alt,
    Shift,
}

impl Modifier {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ctrl" | "control" => Some(Self::Ctrl),
            "alt" | "menu" => Some(Self::Alt),
            "shift" => Some(Self::Shift),
            _ => None,
        }
    }
}

/// Modifier state at the time a key transition was observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
}

impl Modifiers {
    pub fn has(&self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl,
            Modifier::Alt => self.alt,
            Modifier::Shift => self.shift,
        }
    }
}

impl From<ModifiersState> for Modifiers {
    fn from(state: ModifiersState) -> Self {
        Self {
            ctrl: state.control_key(),
            alt: state.alt_key(),
            shift: state.shift_key(),
        }
    }
}

/// `"F1"` … `"F24"` → virtual-key code.
pub fn parse_function_key(name: &str) -> Option<u32> {
    let n: u32 = name
        .trim()
        .strip_prefix(['F', 'f'])?
        .parse()
        .ok()?;
    (1..=24).contains(&n).then(|| VK_F1 + n - 1)
}

/// Resolved hotkeys. Defaults to exit on Ctrl+F4 and forbid F12.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockdownKeys {
    pub exit_modifier: Modifier,
    pub exit_key: u32,
    pub forbidden_key: u32,
}

impl Default for LockdownKeys {
    fn default() -> Self {
        Self {
            exit_modifier: Modifier::Ctrl,
            exit_key: VK_F4,
            forbidden_key: VK_F12,
        }
    }
}

impl TryFrom<&LockdownConfig> for LockdownKeys {
    type Error = HostError;

    fn try_from(config: &LockdownConfig) -> Result<Self> {
        let exit_modifier = Modifier::parse(&config.exit_modifier).ok_or_else(|| {
            HostError::Config(format!("unknown exit modifier {:?}", config.exit_modifier))
        })?;
        let exit_key = parse_function_key(&config.exit_key)
            .ok_or_else(|| HostError::Config(format!("unknown exit key {:?}", config.exit_key)))?;
        let forbidden_key = parse_function_key(&config.forbidden_key).ok_or_else(|| {
            HostError::Config(format!("unknown forbidden key {:?}", config.forbidden_key))
        })?;
        if exit_key == forbidden_key {
            return Err(HostError::Config(
                "exit key and forbidden key must differ".into(),
            ));
        }
        Ok(Self {
            exit_modifier,
            exit_key,
            forbidden_key,
        })
    }
}

/// Maps the function-key row of a winit physical key onto virtual-key codes.
pub fn vk_from_key_code(code: KeyCode) -> Option<u32> {
    let n = match code {
        KeyCode::F1 => 1,
        KeyCode::F2 => 2,
        KeyCode::F3 => 3,
        KeyCode::F4 => 4,
        KeyCode::F5 => 5,
        KeyCode::F6 => 6,
        KeyCode::F7 => 7,
        KeyCode::F8 => 8,
        KeyCode::F9 => 9,
        KeyCode::F10 => 10,
        KeyCode::F11 => 11,
        KeyCode::F12 => 12,
        KeyCode::F13 => 13,
        KeyCode::F14 => 14,
        KeyCode::F15 => 15,
        KeyCode::F16 => 16,
        KeyCode::F17 => 17,
        KeyCode::F18 => 18,
        KeyCode::F19 => 19,
        KeyCode::F20 => 20,
        KeyCode::F21 => 21,
        KeyCode::F22 => 22,
        KeyCode::F23 => 23,
        KeyCode::F24 => 24,
        _ => return None,
    };
    Some(VK_F1 + n - 1)
}

#[cfg(windows)]
mod platform {
    use windows_sys::Win32::UI::Input::KeyboardAndMouse::{GetAsyncKeyState, GetKeyState};

    use super::{Modifiers, VK_CONTROL, VK_MENU, VK_SHIFT};

    fn down(state: i16) -> bool {
        state < 0
    }

    /// Physical state right now. Used from the low-level hook, which runs
    /// before the thread's key state is updated.
    pub fn async_modifiers() -> Modifiers {
        // SAFETY: GetAsyncKeyState has no preconditions.
        unsafe {
            Modifiers {
                ctrl: down(GetAsyncKeyState(VK_CONTROL as i32)),
                alt: down(GetAsyncKeyState(VK_MENU as i32)),
                shift: down(GetAsyncKeyState(VK_SHIFT as i32)),
            }
        }
    }

    /// State as of the message being processed on this thread.
    pub fn message_modifiers() -> Modifiers {
        // SAFETY: GetKeyState has no preconditions.
        unsafe {
            Modifiers {
                ctrl: down(GetKeyState(VK_CONTROL as i32)),
                alt: down(GetKeyState(VK_MENU as i32)),
                shift: down(GetKeyState(VK_SHIFT as i32)),
            }
        }
    }
}

#[cfg(windows)]
pub use platform::{async_modifiers, message_modifiers};
