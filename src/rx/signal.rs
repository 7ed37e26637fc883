//! Signals delivered from a producer to its subscriber.

use std::fmt;

use crate::error::Error;

/// One event on a reactive stream.
///
/// A stream delivers `Next*` followed by at most one terminal signal.
#[derive(Debug)]
pub enum Signal<T> {
    /// An element.
    Next(T),
    /// Successful end of stream.
    Complete,
    /// Failed end of stream.
    Error(Error),
    /// Consumer cancelled.
    Cancel,
}

impl<T> Signal<T> {
    /// Kind of this signal without its content.
    pub fn signal_type(&self) -> SignalType {
        match self {
            Signal::Next(_) => SignalType::Next,
            Signal::Complete => SignalType::Complete,
            Signal::Error(_) => SignalType::Error,
            Signal::Cancel => SignalType::Cancel,
        }
    }

    /// Whether no signal may follow this one.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Signal::Next(_))
    }
}

/// Kind of a [`Signal`], as passed to `do_finally` hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalType {
    /// An element.
    Next,
    /// Successful end of stream.
    Complete,
    /// Failed end of stream.
    Error,
    /// Consumer cancelled.
    Cancel,
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalType::Next => "Next",
            SignalType::Complete => "Complete",
            SignalType::Error => "Error",
            SignalType::Cancel => "Cancel",
        };
        f.write_str(name)
    }
}
