//! Kiosk input lockdown.
//!
//! Three independent interception points feed one shared [`LockdownContext`]:
//!
//! ```text
//!  WH_KEYBOARD_LL hook ─┐  (hook thread, fires without focus)
//!  message-loop filter ─┼─▶ LockdownContext ─▶ interceptor chain
//!  window subclass ─────┘                        ├─ ExitChordInterceptor ─▶ CloseSignal ─▶ UI thread
//!                                                └─ ForbiddenKeyInterceptor
//! ```
//!
//! Any one mechanism is enough: if the hook fails to install or the window
//! loses focus, the others still see the keys. Whichever sees the exit chord
//! first wins; the close request is idempotent, so the others are no-ops.
//!
//! State machine: `Uninstalled → Installing → Armed → TearingDown → Uninstalled`.
//! Interceptors only act while `Armed`.

pub mod filter;
pub mod hook;
pub mod keys;
pub mod wndproc;

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tracing::{debug, error, info, warn};

use crate::error::{HostError, Result};

pub use filter::MessageFilter;
pub use hook::HookRegistration;
pub use keys::{LockdownKeys, Modifiers};
pub use wndproc::WindowProcOverride;

/// Which interception point observed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mechanism {
    GlobalHook,
    MessageFilter,
    WindowProc,
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::GlobalHook => "global keyboard hook",
            Self::MessageFilter => "message filter",
            Self::WindowProc => "window procedure",
        })
    }
}

/// A key transition, only used to decide its fate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockdownEvent {
    /// Windows virtual-key code.
    pub key_code: u32,
    pub modifiers: Modifiers,
    pub key_down: bool,
    pub source: Mechanism,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Consumed,
    PassThrough,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LockdownState {
    Uninstalled = 0,
    Installing = 1,
    Armed = 2,
    TearingDown = 3,
}

impl LockdownState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Installing,
            2 => Self::Armed,
            3 => Self::TearingDown,
            _ => Self::Uninstalled,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Close signal
// ─────────────────────────────────────────────────────────────────────────────

type CloseSink = Box<dyn Fn(Mechanism) + Send + Sync>;

/// One-shot close request, safe to fire from any thread.
///
/// The sink posts to the UI thread's queue; it never touches window state
/// itself. The sink may be connected after the signal is created, since the
/// message filter must exist before the event loop (and its proxy) does.
#[derive(Default)]
pub struct CloseSignal {
    requested: AtomicBool,
    sink: OnceLock<CloseSink>,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, sink: impl Fn(Mechanism) + Send + Sync + 'static) {
        if self.sink.set(Box::new(sink)).is_err() {
            warn!("Close signal already connected");
        }
    }

    /// Returns `true` only for the call that actually dispatched.
    pub fn request(&self, source: Mechanism) -> bool {
        if self.requested.swap(true, Ordering::SeqCst) {
            debug!(%source, "Close already requested");
            return false;
        }
        info!(%source, "Exit hotkey: close requested");
        match self.sink.get() {
            Some(sink) => sink(source),
            None => error!("Close requested before the UI thread was connected"),
        }
        true
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Interceptor chain
// ─────────────────────────────────────────────────────────────────────────────

pub trait KeyInterceptor: Send + Sync {
    fn name(&self) -> &'static str;
    fn handle(&self, event: &LockdownEvent) -> Verdict;
}

/// Swallows both transitions of the exit chord, closes on key-down.
pub struct ExitChordInterceptor {
    keys: LockdownKeys,
    close: Arc<CloseSignal>,
}

impl KeyInterceptor for ExitChordInterceptor {
    fn name(&self) -> &'static str {
        "exit-chord"
    }

    fn handle(&self, event: &LockdownEvent) -> Verdict {
        if event.key_code != self.keys.exit_key || !event.modifiers.has(self.keys.exit_modifier) {
            return Verdict::PassThrough;
        }
        if event.key_down {
            self.close.request(event.source);
        }
        Verdict::Consumed
    }
}

/// Unconditionally swallows the forbidden key.
pub struct ForbiddenKeyInterceptor {
    key: u32,
}

impl KeyInterceptor for ForbiddenKeyInterceptor {
    fn name(&self) -> &'static str {
        "forbidden-key"
    }

    fn handle(&self, event: &LockdownEvent) -> Verdict {
        if event.key_code == self.key {
            Verdict::Consumed
        } else {
            Verdict::PassThrough
        }
    }
}

/// Shared by all three mechanisms. Passed explicitly at install time.
pub struct LockdownContext {
    state: AtomicU8,
    chain: Vec<Box<dyn KeyInterceptor>>,
    close: Arc<CloseSignal>,
}

impl LockdownContext {
    pub fn new(keys: LockdownKeys, close: Arc<CloseSignal>) -> Self {
        let chain: Vec<Box<dyn KeyInterceptor>> = vec![
            Box::new(ExitChordInterceptor {
                keys,
                close: close.clone(),
            }),
            Box::new(ForbiddenKeyInterceptor {
                key: keys.forbidden_key,
            }),
        ];
        Self {
            state: AtomicU8::new(LockdownState::Uninstalled as u8),
            chain,
            close,
        }
    }

    pub fn state(&self) -> LockdownState {
        LockdownState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: LockdownState) {
        self.state.store(state as u8, Ordering::SeqCst);
        debug!(?state, "Lockdown state");
    }

    pub fn close_signal(&self) -> &Arc<CloseSignal> {
        &self.close
    }

    /// Walks the chain until one interceptor consumes the event.
    pub fn handle(&self, event: &LockdownEvent) -> Verdict {
        if self.state() != LockdownState::Armed {
            return Verdict::PassThrough;
        }
        for interceptor in &self.chain {
            if interceptor.handle(event) == Verdict::Consumed {
                debug!(
                    interceptor = interceptor.name(),
                    source = %event.source,
                    key = event.key_code,
                    "Key consumed"
                );
                return Verdict::Consumed;
            }
        }
        Verdict::PassThrough
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subsystem
// ─────────────────────────────────────────────────────────────────────────────

/// Which mechanisms ended up live after [`Lockdown::arm`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub global_hook: bool,
    pub message_filter: bool,
    pub window_proc: bool,
    pub failures: Vec<String>,
}

impl InstallReport {
    pub fn active(&self) -> usize {
        [self.global_hook, self.message_filter, self.window_proc]
            .iter()
            .filter(|on| **on)
            .count()
    }
}

pub struct Lockdown {
    ctx: Arc<LockdownContext>,
    hook: Option<HookRegistration>,
    window_proc: Option<WindowProcOverride>,
}

impl Lockdown {
    pub fn new(keys: LockdownKeys, close: Arc<CloseSignal>) -> Self {
        Self {
            ctx: Arc::new(LockdownContext::new(keys, close)),
            hook: None,
            window_proc: None,
        }
    }

    pub fn context(&self) -> Arc<LockdownContext> {
        self.ctx.clone()
    }

    pub fn state(&self) -> LockdownState {
        self.ctx.state()
    }

    /// Builds the message filter bound to this lockdown's context.
    pub fn message_filter(&self) -> MessageFilter {
        MessageFilter::new(self.ctx.clone())
    }

    /// Installs the global hook and the window override, then arms.
    ///
    /// Install failures are logged and reported, never fatal: the message
    /// filter is always attached, so at least one mechanism is live.
    pub fn arm(&mut self, hwnd: Option<isize>) -> InstallReport {
        if self.ctx.state() != LockdownState::Uninstalled {
            warn!(state = ?self.ctx.state(), "Lockdown already armed");
            return InstallReport::default();
        }
        self.ctx.set_state(LockdownState::Installing);
        let mut report = InstallReport {
            message_filter: true,
            ..InstallReport::default()
        };

        match HookRegistration::install(self.ctx.clone()) {
            Ok(registration) => {
                report.global_hook = registration.is_installed();
                self.hook = Some(registration);
            }
            Err(e) => {
                warn!(error = %e, "Lockdown degraded");
                report.failures.push(e.to_string());
            }
        }

        match hwnd {
            Some(hwnd) => match WindowProcOverride::install(hwnd, self.ctx.clone()) {
                Ok(window_proc) => {
                    report.window_proc = true;
                    self.window_proc = Some(window_proc);
                }
                Err(e) => {
                    warn!(error = %e, "Lockdown degraded");
                    report.failures.push(e.to_string());
                }
            },
            None => report
                .failures
                .push(format!("{} install failed: no native window", Mechanism::WindowProc)),
        }

        self.ctx.set_state(LockdownState::Armed);
        info!(
            global_hook = report.global_hook,
            message_filter = report.message_filter,
            window_proc = report.window_proc,
            "Lockdown armed"
        );
        report
    }

    /// Removes the window override and releases the global hook exactly once.
    ///
    /// A hook that cannot be released is reported as an error, but the state
    /// machine still completes so the process can exit.
    pub fn teardown(&mut self) -> Result<()> {
        match self.ctx.state() {
            LockdownState::Uninstalled => return Ok(()),
            LockdownState::TearingDown => {
                return Err(HostError::HookReleaseFailed {
                    mechanism: "lockdown",
                    reason: "teardown re-entered".into(),
                });
            }
            _ => {}
        }
        self.ctx.set_state(LockdownState::TearingDown);

        if let Some(mut window_proc) = self.window_proc.take() {
            window_proc.remove();
        }

        let released = match self.hook.take() {
            Some(mut hook) => hook.release(),
            None => Ok(()),
        };

        self.ctx.set_state(LockdownState::Uninstalled);
        match &released {
            Ok(()) => info!("Lockdown torn down"),
            Err(e) => error!(error = %e, "Global keyboard hook leaked past shutdown"),
        }
        released
    }
}

impl Drop for Lockdown {
    fn drop(&mut self) {
        if self.ctx.state() != LockdownState::Uninstalled {
            let _ = self.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::keys::{Modifier, VK_F4, VK_F12};
    use super::*;

    fn counting_signal() -> (Arc<CloseSignal>, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let signal = Arc::new(CloseSignal::new());
        let c = count.clone();
        signal.connect(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        (signal, count)
    }

    fn keys() -> LockdownKeys {
        LockdownKeys {
            exit_modifier: Modifier::Ctrl,
            exit_key: VK_F4,
            forbidden_key: VK_F12,
        }
    }

    fn event(key_code: u32, ctrl: bool, source: Mechanism) -> LockdownEvent {
        LockdownEvent {
            key_code,
            modifiers: Modifiers {
                ctrl,
                ..Modifiers::default()
            },
            key_down: true,
            source,
        }
    }

    fn armed(ctx: &LockdownContext) {
        ctx.set_state(LockdownState::Armed);
    }

    const ALL: [Mechanism; 3] = [
        Mechanism::GlobalHook,
        Mechanism::MessageFilter,
        Mechanism::WindowProc,
    ];

    #[test]
    fn test_exit_chord_from_each_mechanism_closes_once() {
        for source in ALL {
            let (signal, count) = counting_signal();
            let ctx = LockdownContext::new(keys(), signal.clone());
            armed(&ctx);
            assert_eq!(ctx.handle(&event(VK_F4, true, source)), Verdict::Consumed);
            assert_eq!(count.load(Ordering::SeqCst), 1, "{source}");
            assert!(signal.is_requested());
        }
    }

    #[test]
    fn test_all_three_mechanisms_firing_dispatch_single_close() {
        let (signal, count) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        armed(&ctx);
        for source in ALL {
            assert_eq!(ctx.handle(&event(VK_F4, true, source)), Verdict::Consumed);
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_exit_key_without_modifier_passes() {
        let (signal, count) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        armed(&ctx);
        assert_eq!(
            ctx.handle(&event(VK_F4, false, Mechanism::GlobalHook)),
            Verdict::PassThrough
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_exit_key_up_is_swallowed_without_closing() {
        let (signal, count) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        armed(&ctx);
        let mut up = event(VK_F4, true, Mechanism::MessageFilter);
        up.key_down = false;
        assert_eq!(ctx.handle(&up), Verdict::Consumed);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_forbidden_key_always_suppressed_while_armed() {
        let (signal, _count) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        armed(&ctx);
        for i in 0..300 {
            let source = ALL[i % 3];
            let mut e = event(VK_F12, i % 2 == 0, source);
            e.key_down = i % 4 < 2;
            assert_eq!(ctx.handle(&e), Verdict::Consumed);
        }
    }

    #[test]
    fn test_nothing_intercepted_unless_armed() {
        let (signal, count) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        for state in [
            LockdownState::Uninstalled,
            LockdownState::Installing,
            LockdownState::TearingDown,
        ] {
            ctx.set_state(state);
            assert_eq!(
                ctx.handle(&event(VK_F12, false, Mechanism::GlobalHook)),
                Verdict::PassThrough
            );
            assert_eq!(
                ctx.handle(&event(VK_F4, true, Mechanism::GlobalHook)),
                Verdict::PassThrough
            );
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_ordinary_keys_pass_through() {
        let (signal, _) = counting_signal();
        let ctx = LockdownContext::new(keys(), signal);
        armed(&ctx);
        assert_eq!(
            ctx.handle(&event(0x41, true, Mechanism::WindowProc)),
            Verdict::PassThrough
        );
    }

    #[test]
    fn test_close_request_before_connect_is_recorded() {
        let signal = CloseSignal::new();
        assert!(signal.request(Mechanism::MessageFilter));
        assert!(!signal.request(Mechanism::GlobalHook));
        assert!(signal.is_requested());
    }

    #[test]
    fn test_arm_then_teardown_cycle() {
        let (signal, _) = counting_signal();
        let mut lockdown = Lockdown::new(keys(), signal);
        let ctx = lockdown.context();
        assert_eq!(lockdown.state(), LockdownState::Uninstalled);

        let report = lockdown.arm(None);
        assert_eq!(lockdown.state(), LockdownState::Armed);
        assert!(report.message_filter);
        assert!(report.active() >= 1);
        assert!(!report.window_proc);
        assert_eq!(
            ctx.handle(&event(VK_F12, false, Mechanism::MessageFilter)),
            Verdict::Consumed
        );

        // A second arm is refused without touching the mechanisms.
        assert_eq!(lockdown.arm(None), InstallReport::default());

        lockdown.teardown().unwrap();
        assert_eq!(lockdown.state(), LockdownState::Uninstalled);
        assert_eq!(
            ctx.handle(&event(VK_F12, false, Mechanism::MessageFilter)),
            Verdict::PassThrough
        );

        // Tearing down twice is a no-op.
        lockdown.teardown().unwrap();
    }

    #[cfg(not(windows))]
    #[test]
    fn test_os_mechanisms_degrade_gracefully_off_windows() {
        let (signal, _) = counting_signal();
        let mut lockdown = Lockdown::new(keys(), signal);
        let report = lockdown.arm(Some(0x1234));
        assert!(!report.global_hook);
        assert!(!report.window_proc);
        assert_eq!(report.active(), 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(lockdown.state(), LockdownState::Armed);
    }
}
