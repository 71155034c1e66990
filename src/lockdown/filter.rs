//! Application-level message filter.
//!
//! Sees key messages after the thread's message loop dequeues them and before
//! they are dispatched to any window. On Windows it is attached to winit's
//! loop through `with_msg_hook`; everywhere, winit's own keyboard events are
//! routed through [`MessageFilter::filter_key_event`] before reaching the
//! engine.

use std::sync::Arc;

use winit::event::{ElementState, KeyEvent};
use winit::keyboard::{ModifiersState, PhysicalKey};

use super::keys::{vk_from_key_code, Modifiers};
use super::{LockdownContext, LockdownEvent, Mechanism, Verdict};

#[derive(Clone)]
pub struct MessageFilter {
    ctx: Arc<LockdownContext>,
}

impl MessageFilter {
    pub fn new(ctx: Arc<LockdownContext>) -> Self {
        Self { ctx }
    }

    pub fn filter_key(&self, key_code: u32, modifiers: Modifiers, key_down: bool) -> Verdict {
        self.ctx.handle(&LockdownEvent {
            key_code,
            modifiers,
            key_down,
            source: Mechanism::MessageFilter,
        })
    }

    /// Portable path: a winit keyboard event about to be forwarded.
    pub fn filter_key_event(&self, event: &KeyEvent, modifiers: ModifiersState) -> Verdict {
        let PhysicalKey::Code(code) = event.physical_key else {
            return Verdict::PassThrough;
        };
        let Some(key_code) = vk_from_key_code(code) else {
            return Verdict::PassThrough;
        };
        self.filter_key(
            key_code,
            Modifiers::from(modifiers),
            event.state == ElementState::Pressed,
        )
    }

    /// Raw message path for winit's `with_msg_hook`. Returns `true` to drop
    /// the message.
    #[cfg(windows)]
    pub fn filter_msg(&self, msg: *const std::ffi::c_void) -> bool {
        use windows_sys::Win32::UI::WindowsAndMessaging::{
            MSG, WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP,
        };

        if msg.is_null() {
            return false;
        }
        // SAFETY: winit hands us a pointer to the MSG it just dequeued.
        let msg = unsafe { &*(msg as *const MSG) };
        let key_down = match msg.message {
            WM_KEYDOWN | WM_SYSKEYDOWN => true,
            WM_KEYUP | WM_SYSKEYUP => false,
            _ => return false,
        };
        self.filter_key(
            msg.wParam as u32,
            super::keys::message_modifiers(),
            key_down,
        ) == Verdict::Consumed
    }
}
