//! Error handling shared across skein crates.
//!
//! Crates define their own error enums and return them wrapped in a
//! [`rootcause::Report`]; this alias keeps those signatures short.

use rootcause::Report;

/// A `Result` whose error is a [`Report`] carrying context `C`.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug, PartialEq, Eq)]
    struct NotFound;

    impl fmt::Display for NotFound {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("not found")
        }
    }

    impl std::error::Error for NotFound {}

    fn lookup(present: bool) -> Result<u32, NotFound> {
        if present { Ok(7) } else { Err(NotFound.into()) }
    }

    #[test]
    fn report_carries_context() {
        assert_eq!(lookup(true).expect("present"), 7);
        let err = lookup(false).expect_err("absent");
        assert_eq!(err.current_context(), &NotFound);
    }
}
