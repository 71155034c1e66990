//! Factory pour le contexte de rendu GPU.
//!
//! Le kiosque n'a pas de chrome : la WebView peint directement dans le
//! `WindowRenderingContext` de la fenêtre, sans FBO intermédiaire.

use std::rc::Rc;

use servo::{RenderingContext, WindowRenderingContext};
use winit::dpi::PhysicalSize;
use winit::raw_window_handle::{DisplayHandle, WindowHandle};

use crate::error::{HostError, Result};

/// Crée un contexte de rendu matériel lié à la fenêtre Winit et le rend
/// courant, ce qui est requis avant de le passer à `WebViewBuilder`.
///
/// Un échec (pas de driver compatible, handles invalides) est remonté à
/// l'appelant, qui affiche une notice bloquante et continue sans contenu.
pub fn create_rendering_context(
    display_handle: DisplayHandle<'_>,
    window_handle: WindowHandle<'_>,
    size: PhysicalSize<u32>,
) -> Result<Rc<WindowRenderingContext>> {
    let rendering_context = WindowRenderingContext::new(display_handle, window_handle, size)
        .map_err(|e| HostError::RenderingSurfaceInitFailed(format!("{e:?}")))?;

    rendering_context
        .make_current()
        .map_err(|e| HostError::RenderingSurfaceInitFailed(format!("make_current: {e:?}")))?;

    Ok(Rc::new(rendering_context))
}
