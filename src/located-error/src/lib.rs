use std::{fmt::Display, panic::Location};

use anyhow::Context;

/// Public prelude for located-error.
///
/// Note that this re-exports the relevant items of anyhow and thiserror.
pub mod prelude {
    pub use anyhow::{anyhow, bail, Context, Result};
    pub use thiserror::Error;
    pub use super::{LocatedError, LocatedOption};
}

/// Format the caller's location as a `[file:line:column]` tag.
#[inline]
fn caller_tag(caller: &'static Location<'static>) -> String {
    format!("[{}:{}:{}]", caller.file(), caller.line(), caller.column())
}

/// Extends [`Result`] with context carrying the location at which the error
/// was propagated (file, line and column).
///
/// `loc()` evaluates its context eagerly; `with_loc()` only once an error
/// actually occurs. Both convert the error into an [`anyhow::Error`], so the
/// original error type remains available through downcasting.
///
/// ```text
/// Error: [src/bind.rs:41:22] While binding frequency scan
///
/// Caused by:
///     0: [src/header.rs:88:14] While probing 'samples.pgen'
///     1: No such file or directory (os error 2)
/// ```
pub trait LocatedError<T> {
    /// Wrap the error value with `context`, prefixed by the caller location.
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static;

    /// Wrap the error value with a lazily evaluated context, prefixed by the
    /// caller location.
    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> LocatedError<T> for Result<T, E>
where
    Result<T, E>: Context<T, E>,
{
    #[track_caller]
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        let tag = caller_tag(Location::caller());
        self.context(format!("{tag} {context}"))
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        let tag = caller_tag(Location::caller());
        self.with_context(|| format!("{tag} {}", f()))
    }
}

/// [`LocatedError`], for [`Option`]. `None` becomes an [`anyhow::Error`]
/// whose message is the location-tagged context.
pub trait LocatedOption<T> {
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static;

    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T> LocatedOption<T> for Option<T> {
    #[track_caller]
    fn loc<C>(self, context: C) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        let tag = caller_tag(Location::caller());
        self.with_context(|| format!("{tag} {context}"))
    }

    #[track_caller]
    fn with_loc<C, F>(self, f: F) -> anyhow::Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        let tag = caller_tag(Location::caller());
        self.with_context(|| format!("{tag} {}", f()))
    }
}
