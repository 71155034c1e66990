//! Operator-facing blocking prompts.
//!
//! Used before the event loop exists (storage recovery) and when the
//! rendering surface cannot be created. On Windows these are native message
//! boxes; elsewhere the prompt falls back to the controlling terminal.

use std::io::BufRead;

use tracing::info;

/// Operator decision after the storage retries are exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryChoice {
    /// Reset the counter and try again after a longer pause.
    Retry,
    /// Give up on storage and run degraded.
    Continue,
}

pub trait OperatorPrompt {
    /// Blocks until the operator chooses retry or continue.
    fn ask_retry(&self, location: &str, last_error: &str, attempts: u32) -> RecoveryChoice;

    /// Blocking notice with a single acknowledgement.
    fn notify(&self, title: &str, message: &str);
}

/// Platform prompt: message boxes on Windows, stdin/stderr elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativePrompt;

fn retry_text(location: &str, last_error: &str, attempts: u32) -> String {
    format!(
        "The local database could not be reached after {attempts} attempts.\n\n\
         Location: {location}\nError: {last_error}\n\n\
         Retry to try again, or Cancel to continue without local data."
    )
}

impl OperatorPrompt for NativePrompt {
    fn ask_retry(&self, location: &str, last_error: &str, attempts: u32) -> RecoveryChoice {
        let text = retry_text(location, last_error, attempts);
        let choice = platform::ask_retry("Storage unavailable", &text);
        info!(?choice, "Operator answered storage recovery prompt");
        choice
    }

    fn notify(&self, title: &str, message: &str) {
        platform::notify(title, message);
    }
}

#[cfg(windows)]
mod platform {
    use std::ptr::null_mut;

    use windows_sys::Win32::UI::WindowsAndMessaging::{
        IDRETRY, MB_ICONERROR, MB_ICONWARNING, MB_OK, MB_RETRYCANCEL, MB_TOPMOST, MessageBoxW,
    };

    use super::RecoveryChoice;

    fn wide(s: &str) -> Vec<u16> {
        s.encode_utf16().chain(std::iter::once(0)).collect()
    }

    pub fn ask_retry(title: &str, text: &str) -> RecoveryChoice {
        let (title, text) = (wide(title), wide(text));
        let answer = unsafe {
            MessageBoxW(
                null_mut(),
                text.as_ptr(),
                title.as_ptr(),
                MB_RETRYCANCEL | MB_ICONWARNING | MB_TOPMOST,
            )
        };
        if answer == IDRETRY {
            RecoveryChoice::Retry
        } else {
            RecoveryChoice::Continue
        }
    }

    pub fn notify(title: &str, text: &str) {
        let (title, text) = (wide(title), wide(text));
        unsafe {
            MessageBoxW(
                null_mut(),
                text.as_ptr(),
                title.as_ptr(),
                MB_OK | MB_ICONERROR | MB_TOPMOST,
            );
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::io::{self, Write};

    use super::{RecoveryChoice, read_choice};

    pub fn ask_retry(title: &str, text: &str) -> RecoveryChoice {
        eprintln!("── {title} ──");
        eprintln!("{text}");
        eprint!("[r]etry / [c]ontinue > ");
        let _ = io::stderr().flush();
        read_choice(io::stdin().lock())
    }

    pub fn notify(title: &str, text: &str) {
        eprintln!("── {title} ──");
        eprintln!("{text}");
    }
}

/// Parses one answer line. Anything but an explicit retry, including a
/// closed stdin, continues: an unattended kiosk must not spin forever.
#[cfg_attr(windows, allow(dead_code))]
fn read_choice(mut input: impl BufRead) -> RecoveryChoice {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(n) if n > 0 && line.trim().eq_ignore_ascii_case("r") => RecoveryChoice::Retry,
        Ok(n) if n > 0 && line.trim().eq_ignore_ascii_case("retry") => RecoveryChoice::Retry,
        _ => RecoveryChoice::Continue,
    }
}
