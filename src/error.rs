// SPDX-FileCopyrightText: 2025 Maciej Borzecki <maciek.borzecki@gmail.com>
//
// SPDX-License-Identifier: MIT

use thiserror;

use crate::cloud::ApiError;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    AmbiguousMatch(String),
    #[error("API error: {0}")]
    RemoteApi(#[from] ApiError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

/// An operation failed, possibly after it already changed remote state.
#[derive(thiserror::Error, Debug, PartialEq)]
#[error("{error}")]
pub struct Failure {
    pub changed: bool,
    #[source]
    pub error: Error,
}

impl Failure {
    pub fn unchanged(error: impl Into<Error>) -> Self {
        Failure {
            changed: false,
            error: error.into(),
        }
    }
}

impl From<Error> for Failure {
    fn from(error: Error) -> Self {
        Failure::unchanged(error)
    }
}

impl From<ApiError> for Failure {
    fn from(error: ApiError) -> Self {
        Failure::unchanged(error)
    }
}

/// Attaches the changed state to errors of a fallible operation.
pub trait WithChanged<T> {
    fn with_changed(self, changed: bool) -> Result<T, Failure>;
}

impl<T, E> WithChanged<T> for Result<T, E>
where
    E: Into<Error>,
{
    fn with_changed(self, changed: bool) -> Result<T, Failure> {
        self.map_err(|e| Failure {
            changed,
            error: e.into(),
        })
    }
}
