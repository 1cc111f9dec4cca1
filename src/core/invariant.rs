//! Invariant checks for static data.
//!
//! Missing data that should be impossible (a graph node id that the area
//! itself handed out, an actor id held by a live reference) means the loaded
//! data is corrupt. Those cases panic here instead of limping on with an
//! invalid state; ordinary absence (no path yet, no target) is modelled with
//! `Option` by the callers and never reaches this module.

use std::fmt::Display;

/// Unwrap a value whose presence is an invariant.
///
/// # Panics
///
/// Panics with `what` in the message when `value` is `None`.
#[track_caller]
pub fn expect_present<T>(value: Option<T>, what: impl Display) -> T {
    match value {
        Some(value) => value,
        None => panic!("invariant violated: {what} does not exist"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_value_passes_through() {
        assert_eq!(expect_present(Some(3), "node 3"), 3);
    }

    #[test]
    #[should_panic(expected = "invariant violated: graph node 42 does not exist")]
    fn test_missing_value_panics() {
        let missing: Option<u32> = None;
        expect_present(missing, format_args!("graph node {}", 42));
    }
}
