//! Point d'entrée de l'hôte kiosque.
//!
//! Usage :
//!   kiosk-host [--config PATH] [--no-lockdown] [--write-config]
//!
//! Exemples :
//!   cargo run                              → config par défaut, verrouillage actif
//!   cargo run -- --config kiosk.toml       → config explicite
//!   cargo run -- --no-lockdown             → poste de développement
//!   cargo run -- --write-config            → écrit la config courante puis quitte

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info, warn};
use winit::event_loop::EventLoop;

use kiosk_host::browser::{App, Boot};
use kiosk_host::config::KioskConfig;
use kiosk_host::lockdown::{CloseSignal, Lockdown, LockdownKeys};
use kiosk_host::prompt::{NativePrompt, OperatorPrompt};
use kiosk_host::servo_glue::{AppEvent, Waker};
use kiosk_host::storage::SqliteOpener;
use kiosk_host::{resources, startup};

struct Args {
    config: Option<PathBuf>,
    no_lockdown: bool,
    write_config: bool,
}

fn parse_args() -> Args {
    let mut args = Args {
        config: None,
        no_lockdown: false,
        write_config: false,
    };
    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => args.config = iter.next().map(PathBuf::from),
            "--no-lockdown" => args.no_lockdown = true,
            "--write-config" => args.write_config = true,
            other => eprintln!("Ignoring unknown argument {other:?}"),
        }
    }
    args
}

fn main() -> ExitCode {
    let args = parse_args();

    // ── 1. Provider crypto TLS ─────────────────────────────────────────
    let tls_installed = rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_ok();

    // ── 2. Logging / Tracing ───────────────────────────────────────────
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if !tls_installed {
        warn!("A rustls crypto provider was already installed");
    }

    // ── 3. Configuration ───────────────────────────────────────────────
    let mut config = KioskConfig::load(args.config.as_deref());
    if args.no_lockdown {
        config.lockdown.enabled = false;
    }
    if args.write_config {
        return match config.save() {
            Ok(path) => {
                println!("{}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "Configuration could not be written");
                ExitCode::FAILURE
            }
        };
    }

    #[cfg(debug_assertions)]
    warn!("Running a debug build, pages render slowly");

    // ── 4. Lecteur de ressources Servo ─────────────────────────────────
    if let Err(e) = resources::init() {
        error!(error = %e, "Servo resources not found");
        NativePrompt.notify(
            "Kiosk resources missing",
            &format!("Engine resources could not be located.\n\n{e}"),
        );
    }

    // ── 5. Stockage, serveur local, contenu ────────────────────────────
    let base_dir = startup::base_dir(env::current_dir().ok(), env::current_exe().ok());
    let opener = SqliteOpener::new(config.storage.database.clone());
    let prepared = startup::prepare(&config, &opener, &NativePrompt, &base_dir);

    // ── 6. Verrouillage clavier ────────────────────────────────────────
    // Le signal et le filtre existent avant la boucle ; le proxy, après.
    let close = Arc::new(CloseSignal::new());
    let lockdown = config.lockdown.enabled.then(|| {
        let keys = LockdownKeys::try_from(&config.lockdown).unwrap_or_else(|e| {
            warn!(error = %e, "Invalid lockdown keys, using Ctrl+F4 / F12");
            LockdownKeys::default()
        });
        Lockdown::new(keys, close.clone())
    });
    if lockdown.is_none() {
        warn!("Keyboard lockdown disabled");
    }

    // ── 7. Boucle d'événements Winit ───────────────────────────────────
    let mut builder = EventLoop::<AppEvent>::with_user_event();
    #[cfg(windows)]
    if let Some(filter) = lockdown.as_ref().map(Lockdown::message_filter) {
        use winit::platform::windows::EventLoopBuilderExtWindows;
        builder.with_msg_hook(move |msg| filter.filter_msg(msg));
    }
    let event_loop = match builder.build() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!(error = %e, "Event loop could not be created");
            prepared.discard();
            return ExitCode::FAILURE;
        }
    };

    let waker = Waker::new(&event_loop);
    let exit_waker = waker.clone();
    close.connect(move |source| exit_waker.request_exit(source));

    let mut app = App::new(
        waker,
        Boot {
            window: config.general.clone(),
            prepared,
            lockdown,
        },
    );

    if let Err(e) = event_loop.run_app(&mut app) {
        error!(error = %e, "Event loop terminated abnormally");
        return ExitCode::FAILURE;
    }
    info!("Kiosk exited");
    app.exit_code()
}
