//! System-wide low-level keyboard hook.
//!
//! The hook lives on its own thread with its own message pump: a
//! `WH_KEYBOARD_LL` callback is delivered to the installing thread, and the
//! UI thread may be busy painting. The callback only consults the shared
//! context; a close request is posted back to the UI thread through the
//! [`CloseSignal`](super::CloseSignal) sink.
//!
//! The registration is released exactly once, by [`HookRegistration::release`]
//! or, failing that, on drop.

use std::sync::Arc;

use tracing::{error, info};

use super::{LockdownContext, Mechanism};
use crate::error::{HostError, Result};

const MECHANISM: &str = "global keyboard hook";

fn install_failed(reason: impl Into<String>) -> HostError {
    HostError::HookInstallFailed {
        mechanism: MECHANISM,
        reason: reason.into(),
    }
}

fn release_failed(reason: impl Into<String>) -> HostError {
    HostError::HookReleaseFailed {
        mechanism: MECHANISM,
        reason: reason.into(),
    }
}

/// Live global hook. `installed` flips back to `false` on release.
pub struct HookRegistration {
    installed: bool,
    inner: platform::HookThread,
}

impl HookRegistration {
    pub fn install(ctx: Arc<LockdownContext>) -> Result<Self> {
        let inner = platform::HookThread::spawn(ctx)?;
        info!(mechanism = %Mechanism::GlobalHook, "Installed");
        Ok(Self {
            installed: true,
            inner,
        })
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    /// Unhooks. Later calls are no-ops.
    pub fn release(&mut self) -> Result<()> {
        if !self.installed {
            return Ok(());
        }
        self.installed = false;
        self.inner.stop()
    }
}

impl Drop for HookRegistration {
    fn drop(&mut self) {
        if self.installed {
            if let Err(e) = self.release() {
                error!(error = %e, "Hook release on drop failed");
            }
        }
    }
}

#[cfg(windows)]
mod platform {
    use std::cell::RefCell;
    use std::sync::{mpsc, Arc};
    use std::thread::{self, JoinHandle};

    use tracing::{debug, warn};
    use windows_sys::Win32::Foundation::{GetLastError, LPARAM, LRESULT, WPARAM};
    use windows_sys::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows_sys::Win32::System::Threading::GetCurrentThreadId;
    use windows_sys::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
        SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HC_ACTION, KBDLLHOOKSTRUCT, MSG,
        PM_NOREMOVE, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT, WM_SYSKEYDOWN, WM_USER,
    };

    use super::{install_failed, release_failed};
    use crate::error::Result;
    use crate::lockdown::keys::async_modifiers;
    use crate::lockdown::{LockdownContext, LockdownEvent, Mechanism, Verdict};

    thread_local! {
        static HOOK_CONTEXT: RefCell<Option<Arc<LockdownContext>>> = const { RefCell::new(None) };
    }

    pub struct HookThread {
        thread_id: u32,
        join: Option<JoinHandle<std::result::Result<(), String>>>,
    }

    impl HookThread {
        pub fn spawn(ctx: Arc<LockdownContext>) -> Result<Self> {
            let (ready_tx, ready_rx) = mpsc::channel();
            let join = thread::Builder::new()
                .name("kiosk-keyboard-hook".into())
                .spawn(move || run(ctx, ready_tx))
                .map_err(|e| install_failed(format!("hook thread spawn: {e}")))?;

            match ready_rx.recv() {
                Ok(Ok(thread_id)) => Ok(Self {
                    thread_id,
                    join: Some(join),
                }),
                Ok(Err(reason)) => {
                    let _ = join.join();
                    Err(install_failed(reason))
                }
                Err(_) => {
                    let _ = join.join();
                    Err(install_failed("hook thread exited before reporting"))
                }
            }
        }

        pub fn stop(&mut self) -> Result<()> {
            let Some(join) = self.join.take() else {
                return Ok(());
            };
            // SAFETY: posting to a thread id we own; the queue exists since
            // the thread peeked before reporting ready.
            let posted = unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, 0, 0) };
            if posted == 0 {
                // SAFETY: no preconditions.
                let code = unsafe { GetLastError() };
                return Err(release_failed(format!("PostThreadMessageW failed: error {code}")));
            }
            match join.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(reason)) => Err(release_failed(reason)),
                Err(_) => Err(release_failed("hook thread panicked")),
            }
        }
    }

    fn run(
        ctx: Arc<LockdownContext>,
        ready: mpsc::Sender<std::result::Result<u32, String>>,
    ) -> std::result::Result<(), String> {
        HOOK_CONTEXT.with(|slot| *slot.borrow_mut() = Some(ctx));

        // SAFETY: plain Win32 calls on this thread; the callback only runs
        // while this thread pumps messages below.
        unsafe {
            let mut msg: MSG = std::mem::zeroed();
            // Forces creation of the message queue so WM_QUIT can be posted.
            PeekMessageW(&mut msg, std::ptr::null_mut(), WM_USER, WM_USER, PM_NOREMOVE);

            let module = GetModuleHandleW(std::ptr::null());
            let hook = SetWindowsHookExW(WH_KEYBOARD_LL, Some(low_level_proc), module, 0);
            if hook.is_null() {
                let code = GetLastError();
                HOOK_CONTEXT.with(|slot| slot.borrow_mut().take());
                let _ = ready.send(Err(format!("SetWindowsHookExW failed: error {code}")));
                return Ok(());
            }
            let _ = ready.send(Ok(GetCurrentThreadId()));
            debug!("Keyboard hook pump started");

            while GetMessageW(&mut msg, std::ptr::null_mut(), 0, 0) > 0 {
                TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            HOOK_CONTEXT.with(|slot| slot.borrow_mut().take());
            if UnhookWindowsHookEx(hook) == 0 {
                let code = GetLastError();
                warn!(code, "UnhookWindowsHookEx failed");
                return Err(format!("UnhookWindowsHookEx failed: error {code}"));
            }
        }
        debug!("Keyboard hook pump stopped");
        Ok(())
    }

    unsafe extern "system" fn low_level_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HC_ACTION as i32 && lparam != 0 {
            // SAFETY: for HC_ACTION, lparam points to a KBDLLHOOKSTRUCT.
            let info = unsafe { &*(lparam as *const KBDLLHOOKSTRUCT) };
            let message = wparam as u32;
            let event = LockdownEvent {
                key_code: info.vkCode,
                modifiers: async_modifiers(),
                key_down: message == WM_KEYDOWN || message == WM_SYSKEYDOWN,
                source: Mechanism::GlobalHook,
            };
            let verdict = HOOK_CONTEXT.with(|slot| slot.borrow().as_ref().map(|ctx| ctx.handle(&event)));
            if verdict == Some(Verdict::Consumed) {
                return 1;
            }
        }
        // SAFETY: forwarding the untouched arguments down the chain.
        unsafe { CallNextHookEx(std::ptr::null_mut(), code, wparam, lparam) }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::sync::Arc;

    use super::install_failed;
    use crate::error::Result;
    use crate::lockdown::LockdownContext;

    pub struct HookThread;

    impl HookThread {
        pub fn spawn(_ctx: Arc<LockdownContext>) -> Result<Self> {
            Err(install_failed("not supported on this platform"))
        }

        pub fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }
}
