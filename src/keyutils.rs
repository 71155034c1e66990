//! Conversion des événements clavier Winit vers les types Servo, et
//! reconnaissance des raccourcis navigateur.
//!
//! Un kiosque n'a besoin que des touches de saisie : caractères, édition,
//! navigation et rangée de fonctions. Tout le reste arrive à Servo comme
//! `Unidentified`.

use servo::{Code, Key, KeyState, KeyboardEvent, Location, Modifiers, NamedKey};
use tracing::debug;
use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{
    Key as WinitKey, KeyCode, KeyLocation as WinitKeyLocation, ModifiersState,
    NamedKey as WinitNamedKey, PhysicalKey,
};

/// Variantes homonymes des deux côtés.
macro_rules! same_variants {
    ($value:expr, $from:ident => $to:ident, [$($variant:ident),* $(,)?], $fallback:expr) => {
        match $value {
            $($from::$variant => $to::$variant,)*
            _ => $fallback,
        }
    };
}

/// Convertit un `KeyEvent` Winit + état des modificateurs en `KeyboardEvent` Servo.
pub fn keyboard_event_from_winit(key_event: &KeyEvent, state: ModifiersState) -> KeyboardEvent {
    KeyboardEvent::new_without_event(
        match key_event.state {
            ElementState::Pressed => KeyState::Down,
            ElementState::Released => KeyState::Up,
        },
        key_from_winit(&key_event.logical_key),
        code_from_winit(&key_event.physical_key),
        location_from_winit(key_event.location),
        modifiers_from_winit(state),
        key_event.repeat,
        false,
    )
}

fn key_from_winit(logical_key: &WinitKey) -> Key {
    let named = match logical_key {
        WinitKey::Character(s) => return Key::Character(s.to_string()),
        WinitKey::Named(WinitNamedKey::Space) => return Key::Character(" ".into()),
        WinitKey::Named(named) => *named,
        WinitKey::Unidentified(_) | WinitKey::Dead(_) => return Key::Named(NamedKey::Unidentified),
    };
    Key::Named(match named {
        WinitNamedKey::Super => NamedKey::Meta,
        other => same_variants!(other, WinitNamedKey => NamedKey, [
            Alt, AltGraph, CapsLock, Control, Fn, NumLock, Shift, Meta,
            Enter, Tab, ArrowDown, ArrowLeft, ArrowRight, ArrowUp, End, Home, PageDown, PageUp,
            Backspace, Clear, Copy, Cut, Delete, Insert, Paste, Redo, Undo,
            Escape, ContextMenu, PrintScreen, Pause,
            BrowserBack, BrowserForward, BrowserRefresh, BrowserHome, BrowserSearch,
            F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
        ], NamedKey::Unidentified),
    })
}

fn location_from_winit(location: WinitKeyLocation) -> Location {
    match location {
        WinitKeyLocation::Standard => Location::Standard,
        WinitKeyLocation::Left => Location::Left,
        WinitKeyLocation::Right => Location::Right,
        WinitKeyLocation::Numpad => Location::Numpad,
    }
}

fn code_from_winit(physical_key: &PhysicalKey) -> Code {
    let PhysicalKey::Code(code) = physical_key else {
        return Code::Unidentified;
    };
    match code {
        KeyCode::SuperLeft => Code::MetaLeft,
        KeyCode::SuperRight => Code::MetaRight,
        other => same_variants!(*other, KeyCode => Code, [
            KeyA, KeyB, KeyC, KeyD, KeyE, KeyF, KeyG, KeyH, KeyI, KeyJ, KeyK, KeyL, KeyM,
            KeyN, KeyO, KeyP, KeyQ, KeyR, KeyS, KeyT, KeyU, KeyV, KeyW, KeyX, KeyY, KeyZ,
            Digit0, Digit1, Digit2, Digit3, Digit4, Digit5, Digit6, Digit7, Digit8, Digit9,
            Backquote, Backslash, BracketLeft, BracketRight, Comma, Equal, Minus, Period,
            Quote, Semicolon, Slash, IntlBackslash,
            AltLeft, AltRight, Backspace, CapsLock, ContextMenu, ControlLeft, ControlRight,
            Enter, ShiftLeft, ShiftRight, Space, Tab,
            Delete, End, Home, Insert, PageDown, PageUp,
            ArrowDown, ArrowLeft, ArrowRight, ArrowUp,
            NumLock, Numpad0, Numpad1, Numpad2, Numpad3, Numpad4, Numpad5, Numpad6,
            Numpad7, Numpad8, Numpad9, NumpadAdd, NumpadDecimal, NumpadDivide, NumpadEnter,
            NumpadMultiply, NumpadSubtract,
            Escape, PrintScreen, Pause,
            F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
        ], Code::Unidentified),
    }
}

pub fn modifiers_from_winit(mods: ModifiersState) -> Modifiers {
    let mut modifiers = Modifiers::empty();
    modifiers.set(Modifiers::CONTROL, mods.control_key());
    modifiers.set(Modifiers::SHIFT, mods.shift_key());
    modifiers.set(Modifiers::ALT, mods.alt_key());
    modifiers.set(Modifiers::META, mods.super_key());
    modifiers
}

// ─────────────────────────────────────────────────────────────────────────────
// Raccourcis navigateur
// ─────────────────────────────────────────────────────────────────────────────

/// Raccourci navigateur reconnu sur un appui de touche.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    Reload,
    Back,
    Forward,
    /// Zoom, impression, recherche, nouvelle fenêtre… jamais exécutés.
    Other,
}

/// Action que l'hôte exécute à la place de Servo pour cet appui.
///
/// `None` : la touche part vers Servo. C'est le cas de tout raccourci quand
/// les accélérateurs sont désactivés, seule l'action de l'hôte est omise.
pub fn embedder_action(event: &KeyEvent, mods: ModifiersState, enabled: bool) -> Option<Accelerator> {
    if event.state != ElementState::Pressed {
        return None;
    }
    embedder_action_for(&event.logical_key, mods, enabled)
}

fn embedder_action_for(key: &WinitKey, mods: ModifiersState, enabled: bool) -> Option<Accelerator> {
    match accelerator_for(key, mods)? {
        Accelerator::Other => None,
        action if enabled => Some(action),
        action => {
            debug!(?action, "Browser shortcut left to the page");
            None
        }
    }
}

fn accelerator_for(key: &WinitKey, mods: ModifiersState) -> Option<Accelerator> {
    let ctrl = mods.control_key();
    let alt = mods.alt_key();
    match key {
        WinitKey::Named(WinitNamedKey::F5 | WinitNamedKey::BrowserRefresh) => {
            Some(Accelerator::Reload)
        }
        WinitKey::Named(WinitNamedKey::BrowserBack) => Some(Accelerator::Back),
        WinitKey::Named(WinitNamedKey::BrowserForward) => Some(Accelerator::Forward),
        WinitKey::Named(WinitNamedKey::ArrowLeft) if alt => Some(Accelerator::Back),
        WinitKey::Named(WinitNamedKey::ArrowRight) if alt => Some(Accelerator::Forward),
        WinitKey::Named(WinitNamedKey::F3 | WinitNamedKey::F7 | WinitNamedKey::F11) => {
            Some(Accelerator::Other)
        }
        WinitKey::Character(c) if ctrl => match c.to_ascii_lowercase().as_str() {
            "r" => Some(Accelerator::Reload),
            "f" | "g" | "l" | "n" | "o" | "p" | "s" | "t" | "u" | "w" | "+" | "=" | "-" | "0" => {
                Some(Accelerator::Other)
            }
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_key() {
        assert_eq!(
            key_from_winit(&WinitKey::Character("é".into())),
            Key::Character("é".to_string())
        );
    }

    #[test]
    fn test_space_maps_to_character() {
        assert_eq!(
            key_from_winit(&WinitKey::Named(WinitNamedKey::Space)),
            Key::Character(" ".to_string())
        );
    }

    #[test]
    fn test_named_keys() {
        assert_eq!(
            key_from_winit(&WinitKey::Named(WinitNamedKey::Enter)),
            Key::Named(NamedKey::Enter)
        );
        assert_eq!(
            key_from_winit(&WinitKey::Named(WinitNamedKey::F12)),
            Key::Named(NamedKey::F12)
        );
        assert_eq!(
            key_from_winit(&WinitKey::Named(WinitNamedKey::Super)),
            Key::Named(NamedKey::Meta)
        );
    }

    #[test]
    fn test_exotic_keys_are_unidentified() {
        assert_eq!(
            key_from_winit(&WinitKey::Named(WinitNamedKey::TVPower)),
            Key::Named(NamedKey::Unidentified)
        );
        assert_eq!(
            key_from_winit(&WinitKey::Dead(Some('^'))),
            Key::Named(NamedKey::Unidentified)
        );
    }

    #[test]
    fn test_codes() {
        assert_eq!(code_from_winit(&PhysicalKey::Code(KeyCode::KeyA)), Code::KeyA);
        assert_eq!(code_from_winit(&PhysicalKey::Code(KeyCode::Numpad5)), Code::Numpad5);
        assert_eq!(
            code_from_winit(&PhysicalKey::Code(KeyCode::SuperLeft)),
            Code::MetaLeft
        );
        assert_eq!(code_from_winit(&PhysicalKey::Code(KeyCode::F24)), Code::Unidentified);
    }

    #[test]
    fn test_locations() {
        assert_eq!(location_from_winit(WinitKeyLocation::Numpad), Location::Numpad);
        assert_eq!(location_from_winit(WinitKeyLocation::Right), Location::Right);
    }

    #[test]
    fn test_accelerators() {
        let none = ModifiersState::empty();
        assert_eq!(
            accelerator_for(&WinitKey::Named(WinitNamedKey::F5), none),
            Some(Accelerator::Reload)
        );
        assert_eq!(
            accelerator_for(&WinitKey::Character("R".into()), ModifiersState::CONTROL),
            Some(Accelerator::Reload)
        );
        assert_eq!(
            accelerator_for(&WinitKey::Named(WinitNamedKey::ArrowLeft), ModifiersState::ALT),
            Some(Accelerator::Back)
        );
        assert_eq!(
            accelerator_for(&WinitKey::Character("p".into()), ModifiersState::CONTROL),
            Some(Accelerator::Other)
        );
        assert_eq!(accelerator_for(&WinitKey::Named(WinitNamedKey::ArrowLeft), none), None);
        assert_eq!(accelerator_for(&WinitKey::Character("r".into()), none), None);
    }

    #[test]
    fn test_disabled_shortcuts_reach_the_page() {
        let none = ModifiersState::empty();
        let f5 = WinitKey::Named(WinitNamedKey::F5);
        let ctrl_r = WinitKey::Character("r".into());
        assert_eq!(embedder_action_for(&f5, none, false), None);
        assert_eq!(embedder_action_for(&ctrl_r, ModifiersState::CONTROL, false), None);
        assert_eq!(embedder_action_for(&f5, none, true), Some(Accelerator::Reload));
        assert_eq!(
            embedder_action_for(&WinitKey::Named(WinitNamedKey::BrowserBack), none, true),
            Some(Accelerator::Back)
        );
    }

    #[test]
    fn test_other_shortcuts_never_run_in_host() {
        let ctrl_p = WinitKey::Character("p".into());
        assert_eq!(embedder_action_for(&ctrl_p, ModifiersState::CONTROL, true), None);
        assert_eq!(embedder_action_for(&ctrl_p, ModifiersState::CONTROL, false), None);
        assert_eq!(embedder_action_for(&WinitKey::Character("a".into()), ModifiersState::empty(), true), None);
    }

    #[test]
    fn test_modifiers_combined() {
        let mods = modifiers_from_winit(ModifiersState::CONTROL | ModifiersState::SUPER);
        assert!(mods.contains(Modifiers::CONTROL));
        assert!(mods.contains(Modifiers::META));
        assert!(!mods.contains(Modifiers::SHIFT));
        assert!(modifiers_from_winit(ModifiersState::empty()).is_empty());
    }
}
