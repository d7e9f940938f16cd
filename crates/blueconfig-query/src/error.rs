//! Error type for the expression parser, planner, and executor.

use thiserror::Error;

use blueconfig_core::BlueConfigError;

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("parse error at position {pos}: {message}")]
    ParseError { pos: usize, message: String },

    #[error("query validation failed: {message}")]
    ValidationError { message: String },

    #[error(transparent)]
    Core(#[from] BlueConfigError),
}

impl QueryError {
    pub fn parse<S: Into<String>>(pos: usize, message: S) -> Self {
        QueryError::ParseError {
            pos,
            message: message.into(),
        }
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        QueryError::ValidationError {
            message: message.into(),
        }
    }
}
