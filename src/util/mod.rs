//! Text and URI helpers shared by the parser, the store and the CLI.

mod text;
mod uri;

pub use text::{
    display_width, escape_attribute, escape_markup, looks_like_html, parse_author,
    strip_control_chars, truncate_to_width,
};
pub use uri::{favicon_url, resolve, resolve_lossy, validate_url, UrlValidationError};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the guard if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
