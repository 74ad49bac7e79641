//! Error types for the HTTP layer

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The request was malformed or asked for something out of range.
    #[error("{0}")]
    BadRequest(String),

    /// The queue operation failed.
    #[error("{action}: {source}")]
    Queue {
        action: &'static str,
        #[source]
        source: sqlq::Error,
    },
}

impl Error {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Error::BadRequest(message.into())
    }

    pub fn queue(action: &'static str) -> impl FnOnce(sqlq::Error) -> Self {
        move |source| Error::Queue { action, source }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Queue { .. } => {
                tracing::error!(error = %self, "Queue operation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, self.to_string()).into_response()
    }
}
