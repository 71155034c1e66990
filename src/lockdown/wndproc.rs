//! Window-procedure override on the kiosk window.
//!
//! Installed with `SetWindowSubclass`, so winit's own procedure stays in the
//! chain and is called for everything the lockdown lets through. The context
//! travels as the subclass reference data; the override keeps one strong
//! count alive until it is removed.

use std::sync::Arc;

use tracing::info;

use super::{LockdownContext, Mechanism};
use crate::error::{HostError, Result};

const MECHANISM: &str = "window procedure";

pub struct WindowProcOverride {
    inner: platform::Subclass,
}

impl WindowProcOverride {
    pub fn install(hwnd: isize, ctx: Arc<LockdownContext>) -> Result<Self> {
        let inner = platform::Subclass::install(hwnd, ctx).map_err(|reason| {
            HostError::HookInstallFailed {
                mechanism: MECHANISM,
                reason,
            }
        })?;
        info!(mechanism = %Mechanism::WindowProc, "Installed");
        Ok(Self { inner })
    }

    /// Restores the original procedure. Idempotent.
    pub fn remove(&mut self) {
        self.inner.remove();
    }
}

impl Drop for WindowProcOverride {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(windows)]
mod platform {
    use std::sync::Arc;

    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::{GetLastError, HWND, LPARAM, LRESULT, WPARAM};
    use windows_sys::Win32::UI::Shell::{DefSubclassProc, RemoveWindowSubclass, SetWindowSubclass};
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        WM_KEYDOWN, WM_KEYUP, WM_SYSKEYDOWN, WM_SYSKEYUP,
    };

    use crate::lockdown::keys::message_modifiers;
    use crate::lockdown::{LockdownContext, LockdownEvent, Mechanism, Verdict};

    const SUBCLASS_ID: usize = 0x4B49_4F53;

    pub struct Subclass {
        hwnd: HWND,
        ctx: Option<*const LockdownContext>,
    }

    impl Subclass {
        pub fn install(hwnd: isize, ctx: Arc<LockdownContext>) -> Result<Self, String> {
            let hwnd = hwnd as HWND;
            let raw = Arc::into_raw(ctx);
            // SAFETY: hwnd belongs to this thread; `raw` stays valid until
            // `remove` reclaims it.
            let ok = unsafe { SetWindowSubclass(hwnd, Some(subclass_proc), SUBCLASS_ID, raw as usize) };
            if ok == 0 {
                // SAFETY: the subclass was not installed, so nobody else
                // holds `raw`.
                drop(unsafe { Arc::from_raw(raw) });
                let code = unsafe { GetLastError() };
                return Err(format!("SetWindowSubclass failed: error {code}"));
            }
            Ok(Self {
                hwnd,
                ctx: Some(raw),
            })
        }

        pub fn remove(&mut self) {
            let Some(raw) = self.ctx.take() else {
                return;
            };
            // SAFETY: same id and procedure as installed.
            let ok = unsafe { RemoveWindowSubclass(self.hwnd, Some(subclass_proc), SUBCLASS_ID) };
            if ok == 0 {
                // The procedure may still run; leak the context rather than
                // free it under it.
                warn!("RemoveWindowSubclass failed, lockdown context leaked");
                return;
            }
            // SAFETY: the subclass no longer references `raw`.
            drop(unsafe { Arc::from_raw(raw) });
            debug!("Window procedure restored");
        }
    }

    unsafe extern "system" fn subclass_proc(
        hwnd: HWND,
        message: u32,
        wparam: WPARAM,
        lparam: LPARAM,
        _id: usize,
        ref_data: usize,
    ) -> LRESULT {
        let key_down = match message {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(true),
            WM_KEYUP | WM_SYSKEYUP => Some(false),
            _ => None,
        };
        if let (Some(key_down), false) = (key_down, ref_data == 0) {
            // SAFETY: ref_data is the pointer passed to SetWindowSubclass,
            // kept alive until RemoveWindowSubclass succeeds.
            let ctx = unsafe { &*(ref_data as *const LockdownContext) };
            let event = LockdownEvent {
                key_code: wparam as u32,
                modifiers: message_modifiers(),
                key_down,
                source: Mechanism::WindowProc,
            };
            if ctx.handle(&event) == Verdict::Consumed {
                return 0;
            }
        }
        // SAFETY: forwarding untouched arguments to the next procedure.
        unsafe { DefSubclassProc(hwnd, message, wparam, lparam) }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::sync::Arc;

    use crate::lockdown::LockdownContext;

    pub struct Subclass;

    impl Subclass {
        pub fn install(_hwnd: isize, _ctx: Arc<LockdownContext>) -> Result<Self, String> {
            Err("not supported on this platform".into())
        }

        pub fn remove(&mut self) {}
    }
}
