//! Boucle d'événements Winit et cycle de vie de la fenêtre kiosque.
//!
//! ## Pattern "Two-Phase App"
//!
//! Winit 0.30 impose que les fenêtres soient créées dans `resumed()`. Tout ce
//! qui peut l'être est donc préparé avant (stockage, serveur, contenu), et la
//! session n'est attachée à la surface Servo qu'une fois la fenêtre créée :
//!
//! ```text
//! App::Initial { waker, boot }  →  [resumed()]  →  App::Running(Running)
//!                                                    │ [Ctrl+F4 / exiting()]
//!                                                    ▼
//!                                               App::Finished { clean }
//! ```
//!
//! ## Flux des événements
//!
//! ```text
//! Threads Servo ──wake()──────────────┐
//! Thread hook clavier ──exit──────────┤  EventLoopProxy::send_event(AppEvent)
//!                                     ▼
//!                        Winit EventLoop (thread principal)
//!                          ├─ Wake           → servo.spin_event_loop()
//!                          └─ ExitRequested  → lockdown, session, exit
//! ```
//!
//! Pas de chrome : la WebView peint directement dans le contexte fenêtre.

use std::cell::{Cell, RefCell};
use std::process::ExitCode;
use std::rc::Rc;

use servo::{InputEvent, WheelDelta, WheelEvent, WheelMode};
use servo::{MouseButton as ServoMouseButton, MouseButtonAction, MouseButtonEvent};
use servo::{MouseLeftViewportEvent, MouseMoveEvent};
use servo::{RenderingContext, Servo, ServoBuilder, WebView, WindowRenderingContext};
use tracing::{debug, error, info, warn};
use webrender_api::units::DevicePoint;
use winit::application::ApplicationHandler;
use winit::event::{ElementState, MouseButton as WinitMouseButton, MouseScrollDelta, WindowEvent};
use winit::event_loop::ActiveEventLoop;
use winit::keyboard::ModifiersState;
use winit::raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawWindowHandle};
use winit::window::{Fullscreen, Window, WindowId};

use crate::bridge::Bridge;
use crate::config::GeneralConfig;
use crate::content::EntryDocument;
use crate::error::{HostError, Result};
use crate::host::SurfaceCapabilities;
use crate::keyutils::{self, Accelerator};
use crate::lockdown::{Lockdown, LockdownState, MessageFilter, Verdict};
use crate::preferences::build_servo_preferences;
use crate::prompt::{NativePrompt, OperatorPrompt};
use crate::rendering;
use crate::servo_glue::{AppEvent, ServoSurface, Waker};
use crate::startup::{PreparedSession, Session};

// ─────────────────────────────────────────────────────────────────────────────
// AppState : état partagé entre Winit et Servo
// ─────────────────────────────────────────────────────────────────────────────

/// État partagé avec Servo, qui le reçoit comme `Rc<dyn WebViewDelegate>`.
/// Tout vit sur le thread principal.
pub struct AppState {
    pub window: Rc<Window>,
    pub servo: Servo,
    pub rendering_context: Rc<WindowRenderingContext>,
    /// Créée à la première navigation, libérée à l'arrêt de la session.
    pub webview: RefCell<Option<WebView>>,
    pub cursor_position: Cell<DevicePoint>,
    pub capabilities: Cell<SurfaceCapabilities>,
    pub init_scripts: RefCell<Vec<String>>,
    pub load_scripts: RefCell<Vec<String>>,
    /// Document d'entrée servi par l'hôte, scripts d'initialisation inclus.
    pub entry: RefCell<Option<EntryDocument>>,
    /// Le document en cours de chargement porte déjà les scripts d'initialisation.
    pub entry_inlined: Cell<bool>,
    /// Bridge servi sur l'origine réservée.
    pub bridge: RefCell<Option<Rc<Bridge>>>,
}

impl AppState {
    fn with_webview(&self, f: impl FnOnce(&WebView)) {
        if let Some(webview) = self.webview.borrow().as_ref() {
            f(webview);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// App : enum deux phases
// ─────────────────────────────────────────────────────────────────────────────

/// Ce que `main` prépare avant la boucle d'événements.
pub struct Boot {
    pub window: GeneralConfig,
    pub prepared: PreparedSession,
    pub lockdown: Option<Lockdown>,
}

pub struct Running {
    window: Rc<Window>,
    /// `None` si la surface de rendu n'a pas pu être créée.
    view: Option<Rc<AppState>>,
    session: Option<Session<ServoSurface>>,
    lockdown: Option<Lockdown>,
    filter: Option<MessageFilter>,
    modifiers: ModifiersState,
    allow_window_close: bool,
}

pub enum App {
    Initial { waker: Waker, boot: Option<Boot> },
    Running(Running),
    /// `clean` est faux si une ressource système n'a pas pu être libérée.
    Finished { clean: bool },
}

impl App {
    pub fn new(waker: Waker, boot: Boot) -> Self {
        Self::Initial {
            waker,
            boot: Some(boot),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Finished { clean: false } => ExitCode::FAILURE,
            _ => ExitCode::SUCCESS,
        }
    }

    /// Verrouillage, puis session, puis sortie de la boucle.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Self::Running(running) = self {
            let clean = running.release();
            *self = Self::Finished { clean };
        }
        event_loop.exit();
    }
}

impl Running {
    fn release(&mut self) -> bool {
        let mut clean = true;
        if let Some(mut lockdown) = self.lockdown.take()
            && let Err(e) = lockdown.teardown()
        {
            error!(error = %e, "Lockdown release failed");
            clean = false;
        }
        if let Some(mut session) = self.session.take() {
            session.shutdown();
        }
        self.view = None;
        info!(clean, "Kiosk shut down");
        clean
    }

    fn locked(&self) -> bool {
        self.lockdown
            .as_ref()
            .is_some_and(|l| l.state() == LockdownState::Armed)
    }
}

fn window_attributes(config: &GeneralConfig) -> winit::window::WindowAttributes {
    Window::default_attributes()
        .with_title(config.window_title.clone())
        .with_inner_size(winit::dpi::LogicalSize::new(
            config.width as f64,
            config.height as f64,
        ))
        .with_decorations(!config.fullscreen)
        .with_resizable(!config.fullscreen)
        .with_fullscreen(config.fullscreen.then_some(Fullscreen::Borderless(None)))
}

fn native_window_handle(window: &Window) -> Option<isize> {
    match window.window_handle().ok()?.as_raw() {
        RawWindowHandle::Win32(handle) => Some(handle.hwnd.get()),
        _ => None,
    }
}

fn create_surface_context(
    event_loop: &ActiveEventLoop,
    window: &Window,
) -> Result<Rc<WindowRenderingContext>> {
    let display_handle = event_loop
        .display_handle()
        .map_err(|e| HostError::RenderingSurfaceInitFailed(e.to_string()))?;
    let window_handle = window
        .window_handle()
        .map_err(|e| HostError::RenderingSurfaceInitFailed(e.to_string()))?;
    rendering::create_rendering_context(display_handle, window_handle, window.inner_size())
}

// ─────────────────────────────────────────────────────────────────────────────
// ApplicationHandler : dispatch des événements Winit
// ─────────────────────────────────────────────────────────────────────────────

impl ApplicationHandler<AppEvent> for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        let Self::Initial { waker, boot } = self else {
            return;
        };
        let Some(Boot {
            window: window_config,
            prepared,
            mut lockdown,
        }) = boot.take()
        else {
            return;
        };
        let waker = waker.clone();

        // ── 1. Fenêtre kiosque ──────────────────────────────────────────
        let window = match event_loop.create_window(window_attributes(&window_config)) {
            Ok(window) => Rc::new(window),
            Err(e) => {
                error!(error = %e, "Kiosk window could not be created");
                NativePrompt.notify("Kiosk unavailable", &format!("The kiosk window could not be created.\n\n{e}"));
                prepared.discard();
                *self = Self::Finished { clean: true };
                event_loop.exit();
                return;
            }
        };

        // ── 2. Verrouillage clavier ─────────────────────────────────────
        let filter = lockdown.as_ref().map(Lockdown::message_filter);
        if let Some(lockdown) = lockdown.as_mut() {
            let report = lockdown.arm(native_window_handle(&window));
            if !report.failures.is_empty() {
                warn!(active = report.active(), failures = ?report.failures, "Lockdown running degraded");
            }
        }

        // ── 3. Surface de rendu ─────────────────────────────────────────
        let (view, session) = match create_surface_context(event_loop, &window) {
            Ok(rendering_context) => {
                let servo = ServoBuilder::default()
                    .preferences(build_servo_preferences(&prepared.capabilities))
                    .event_loop_waker(Box::new(waker))
                    .build();
                let state = Rc::new(AppState {
                    window: window.clone(),
                    servo,
                    rendering_context,
                    webview: RefCell::new(None),
                    cursor_position: Cell::new(DevicePoint::zero()),
                    capabilities: Cell::new(prepared.capabilities),
                    init_scripts: RefCell::new(Vec::new()),
                    load_scripts: RefCell::new(Vec::new()),
                    entry: RefCell::new(None),
                    entry_inlined: Cell::new(false),
                    bridge: RefCell::new(None),
                });
                // ── 4. Transport + navigation ──────────────────────────
                let session = prepared.attach(ServoSurface::new(state.clone()));
                (Some(state), Some(session))
            }
            Err(e) => {
                error!(error = %e, "Rendering surface unavailable, running without content");
                NativePrompt.notify(
                    "Display unavailable",
                    &format!("The kiosk display could not be initialized.\n\n{e}"),
                );
                prepared.discard();
                (None, None)
            }
        };

        // ── 5. Transition Initial → Running ─────────────────────────────
        *self = Self::Running(Running {
            window,
            view,
            session,
            lockdown,
            filter,
            modifiers: ModifiersState::default(),
            allow_window_close: window_config.allow_window_close,
        });
    }

    fn user_event(&mut self, event_loop: &ActiveEventLoop, event: AppEvent) {
        match event {
            AppEvent::Wake => {
                if let Self::Running(Running { view: Some(state), .. }) = self {
                    state.servo.spin_event_loop();
                }
            }
            AppEvent::ExitRequested(source) => {
                info!(%source, "Exit hotkey");
                self.shutdown(event_loop);
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        let Self::Running(running) = self else {
            return;
        };
        if let Some(state) = &running.view {
            state.servo.spin_event_loop();
        }

        match event {
            WindowEvent::CloseRequested => {
                if running.locked() && !running.allow_window_close {
                    info!("Close request ignored while locked down");
                    return;
                }
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if let Some(state) = &running.view {
                    state.with_webview(|webview| webview.paint());
                    state.rendering_context.present();
                }
            }

            WindowEvent::Resized(new_size) => {
                if let Some(state) = &running.view {
                    state.rendering_context.resize(new_size);
                    state.with_webview(|webview| webview.resize(new_size));
                }
            }

            WindowEvent::ModifiersChanged(new_modifiers) => {
                running.modifiers = new_modifiers.state();
            }

            WindowEvent::CursorMoved { position, .. } => {
                if let Some(state) = &running.view {
                    let point = DevicePoint::new(position.x as f32, position.y as f32);
                    state.cursor_position.set(point);
                    state.with_webview(|webview| {
                        webview.notify_input_event(InputEvent::MouseMove(MouseMoveEvent::new(
                            point.into(),
                        )));
                    });
                }
            }

            WindowEvent::CursorLeft { .. } => {
                if let Some(state) = &running.view {
                    state.with_webview(|webview| {
                        webview.notify_input_event(InputEvent::MouseLeftViewport(
                            MouseLeftViewportEvent::default(),
                        ));
                    });
                }
            }

            WindowEvent::MouseWheel { delta, .. } => {
                if let Some(state) = &running.view {
                    let (x, y, mode) = match delta {
                        MouseScrollDelta::LineDelta(dx, dy) => {
                            ((dx * 76.0) as f64, (dy * 76.0) as f64, WheelMode::DeltaLine)
                        }
                        MouseScrollDelta::PixelDelta(delta) => (delta.x, delta.y, WheelMode::DeltaPixel),
                    };
                    let point = state.cursor_position.get();
                    state.with_webview(|webview| {
                        webview.notify_input_event(InputEvent::Wheel(WheelEvent::new(
                            WheelDelta { x, y, z: 0.0, mode },
                            point.into(),
                        )));
                    });
                }
            }

            WindowEvent::MouseInput {
                state: button_state,
                button,
                ..
            } => {
                let Some(state) = &running.view else {
                    return;
                };
                let capabilities = state.capabilities.get();
                let servo_button = match button {
                    WinitMouseButton::Right if !capabilities.context_menu => return,
                    WinitMouseButton::Back | WinitMouseButton::Forward
                        if !capabilities.swipe_navigation =>
                    {
                        return;
                    }
                    WinitMouseButton::Left => ServoMouseButton::Left,
                    WinitMouseButton::Right => ServoMouseButton::Right,
                    WinitMouseButton::Middle => ServoMouseButton::Middle,
                    WinitMouseButton::Back => ServoMouseButton::Back,
                    WinitMouseButton::Forward => ServoMouseButton::Forward,
                    WinitMouseButton::Other(id) => ServoMouseButton::Other(id),
                };
                let action = match button_state {
                    ElementState::Pressed => MouseButtonAction::Down,
                    ElementState::Released => MouseButtonAction::Up,
                };
                let point = state.cursor_position.get();
                state.with_webview(|webview| {
                    webview.notify_input_event(InputEvent::MouseButton(MouseButtonEvent::new(
                        action,
                        servo_button,
                        point.into(),
                    )));
                });
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let mods = running.modifiers;

                // ── Filtre de verrouillage ────────────────────────────────
                if let Some(filter) = &running.filter
                    && filter.filter_key_event(&event, mods) == Verdict::Consumed
                {
                    return;
                }

                let Some(state) = &running.view else {
                    return;
                };

                // ── Raccourcis navigateur ─────────────────────────────────
                let enabled = state.capabilities.get().accelerator_keys;
                if let Some(action) = keyutils::embedder_action(&event, mods, enabled) {
                    match action {
                        Accelerator::Reload => state.with_webview(|webview| webview.reload()),
                        Accelerator::Back => state.with_webview(|webview| {
                            webview.go_back(1);
                        }),
                        Accelerator::Forward => state.with_webview(|webview| {
                            webview.go_forward(1);
                        }),
                        Accelerator::Other => (),
                    }
                    return;
                }

                // ── Passer à Servo ────────────────────────────────────────
                state.with_webview(|webview| {
                    webview.notify_input_event(InputEvent::Keyboard(
                        keyutils::keyboard_event_from_winit(&event, mods),
                    ));
                });
            }

            _ => (),
        }
    }

    /// Dernier filet : l'OS peut fermer la boucle sans passer par nous.
    fn exiting(&mut self, event_loop: &ActiveEventLoop) {
        if matches!(self, Self::Running(_)) {
            warn!("Event loop exiting without an exit request");
            self.shutdown(event_loop);
        }
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if self.lockdown.is_some() || self.session.is_some() {
            self.release();
        }
        debug!(id = ?self.window.id(), "Kiosk window dropped");
    }
}
