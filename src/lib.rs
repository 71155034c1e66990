//! # kiosk-host : coquille kiosque sur Servo
//!
//! Affiche une interface web en plein écran, la relie au stockage SQLite
//! local et empêche l'opérateur de sortir de l'application au clavier.
//!
//! ## Architecture des modules
//!
//! - [`startup`] : Séquence de démarrage. Stockage avec reprises, serveur
//!   local, résolution du contenu, puis attachement à la surface.
//!
//! - [`storage`] / [`resilience`] / [`prompt`] : Ouverture de la base,
//!   boucle de tentatives avec backoff et dialogue opérateur.
//!
//! - [`content`] : Recherche du bundle UI parmi les emplacements candidats,
//!   page de diagnostic en dernier recours.
//!
//! - [`bridge`] / [`transport`] / [`server`] : Bridge de données exposé à
//!   la page, en processus ou via l'API HTTP locale (axum).
//!
//! - [`host`] : Contrôleur d'hôte, indépendant du moteur de rendu.
//!
//! - [`lockdown`] : Verrouillage clavier par trois mécanismes redondants
//!   (hook global, filtre de messages, sous-classement de fenêtre).
//!
//! - [`browser`] : Boucle d'événements Winit et cycle de vie de la fenêtre.
//!   Implémente le pattern "Two-Phase App" imposé par winit 0.30.
//!
//! - [`servo_glue`] : Couche d'intégration Servo, `Waker` et delegates.
//!
//! - [`rendering`] / [`preferences`] / [`resources`] / [`keyutils`] :
//!   Contexte GPU, préférences Servo, ressources moteur, conversion clavier.
//!
//! - [`config`] / [`error`] : Configuration TOML et erreurs typées.

pub mod bridge;
pub mod browser;
pub mod config;
pub mod content;
pub mod error;
pub mod host;
pub mod keyutils;
pub mod lockdown;
pub mod preferences;
pub mod prompt;
pub mod rendering;
pub mod resilience;
pub mod resources;
pub mod server;
pub mod servo_glue;
pub mod startup;
pub mod storage;
pub mod transport;
