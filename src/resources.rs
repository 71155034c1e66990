//! Lecteur de ressources Servo.
//!
//! Servo a besoin de son dossier `resources/` (préférences, certificats,
//! listes publiques de domaines…). Le dossier est résolu une seule fois, au
//! démarrage, dans cet ordre :
//! 1. Variable d'environnement `SERVO_RESOURCES_PATH`
//! 2. À côté de l'exécutable (`<exe_dir>/resources/`), ou à la racine du
//!    projet si l'exécutable est dans `target/{debug,release}/`
//! 3. Dans le répertoire courant (`./resources/`)
//!
//! Un dossier introuvable est une erreur de démarrage, pas une panique
//! différée au premier accès.

use std::path::{Path, PathBuf};
use std::{env, fs};

use servo::resources::{self, Resource};
use tracing::{error, info};

use crate::error::{HostError, Result};

/// Installe le lecteur de ressources. À appeler avant `ServoBuilder::build()`.
pub fn init() -> Result<PathBuf> {
    let dir = locate(
        env::var_os("SERVO_RESOURCES_PATH").map(PathBuf::from),
        env::current_exe().ok(),
        env::current_dir().ok(),
    )
    .ok_or_else(|| {
        HostError::Config(
            "Servo 'resources/' directory not found; set SERVO_RESOURCES_PATH \
             or place it next to the executable"
                .into(),
        )
    })?;
    let dir = dir.canonicalize()?;
    info!(path = %dir.display(), "Servo resources");
    resources::set(Box::new(ResourceReader { dir: dir.clone() }));
    Ok(dir)
}

struct ResourceReader {
    /// Canonique.
    dir: PathBuf,
}

impl resources::ResourceReaderMethods for ResourceReader {
    fn read(&self, file: Resource) -> Vec<u8> {
        match read_within(&self.dir, file.filename()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(resource = file.filename(), error = %e, "Servo resource unreadable");
                Vec::new()
            }
        }
    }

    fn sandbox_access_files_dirs(&self) -> Vec<PathBuf> {
        vec![self.dir.clone()]
    }

    fn sandbox_access_files(&self) -> Vec<PathBuf> {
        vec![]
    }
}

/// Lit `name` sous `dir` en refusant tout chemin qui en sort après
/// résolution des liens et des `..`.
fn read_within(dir: &Path, name: &str) -> Result<Vec<u8>> {
    let canonical = dir.join(name).canonicalize()?;
    if !canonical.starts_with(dir) {
        return Err(HostError::Config(format!(
            "resource {name:?} resolves outside {}",
            dir.display()
        )));
    }
    Ok(fs::read(&canonical)?)
}

/// Premier candidat existant parmi les emplacements connus.
fn locate(from_env: Option<PathBuf>, exe: Option<PathBuf>, cwd: Option<PathBuf>) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    candidates.extend(from_env);

    if let Some(exe_dir) = exe
        .and_then(|exe| exe.canonicalize().ok())
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join("resources"));
        // target/{debug,release}/ → racine du projet
        if let Some(target_dir) = exe_dir.parent()
            && target_dir.file_name().is_some_and(|n| n == "target")
            && let Some(project_root) = target_dir.parent()
        {
            candidates.push(project_root.join("resources"));
        }
    }

    candidates.extend(cwd.map(|cwd| cwd.join("resources")));
    candidates.into_iter().find(|path| path.is_dir())
}
