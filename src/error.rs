//! Centralized error type for the holdfast umbrella crate.
//!
//! Wraps the member crates' errors so `?` propagates naturally across crate
//! boundaries.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] holdfast_core::Error),
}

impl Error {
    /// The underlying retention error.
    pub fn core(&self) -> &holdfast_core::Error {
        match self {
            Error::Core(err) => err,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
