//! Small helpers shared across the engine.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub const APP_NAME: &str = "nomad_feed";

/// Joins the wire `subdomain`/`tld` pair into the author name used everywhere
/// else (`alice@nomad` or a bare `nomad` for top-level names).
pub fn serialize_username(subdomain: Option<&str>, tld: &str) -> String {
    let tld = tld.trim_end_matches('.');
    match subdomain.map(str::trim).filter(|sub| !sub.is_empty()) {
        Some(sub) => format!("{sub}@{tld}"),
        None => tld.to_string(),
    }
}

/// State guarded here is only mutated between awaits, so a poisoned lock still
/// holds a consistent value.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usernames_join_subdomain_and_tld() {
        assert_eq!(serialize_username(Some("alice"), "nomad."), "alice@nomad");
        assert_eq!(serialize_username(None, "nomad"), "nomad");
        assert_eq!(serialize_username(Some("  "), "nomad"), "nomad");
    }
}
