// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of skillshare.
//
// skillshare is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// skillshare is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with skillshare.  If not,
// see <http://www.gnu.org/licenses/>.

//! # http
//!
//! HTTP plumbing shared by every skillshare router: the error categories the core operations
//! report, their mapping onto status codes & the JSON body in which errors are returned.

use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};

/// The category of a failure
///
/// Every error type in the crate can report its [ErrorKind]; the HTTP layer maps that onto a
/// status code (see [ErrorKind::status]) without needing to know anything else about the failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum ErrorKind {
    NotFound,
    InvalidOperation,
    Conflict,
    Unauthorized,
    Forbidden,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidOperation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Map an error onto the status & message to be returned to the caller
///
/// Broken requests get told what went wrong so they can fix it. Authentication failures get a
/// bare "Unauthorized"; there's no reason to tell a potential attacker *why* they failed.
/// Internal failures get owned-up to, but the details go to the log, not the caller.
pub fn status_and_msg(kind: ErrorKind, err: &impl std::fmt::Display) -> (StatusCode, String) {
    match kind {
        ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_owned()),
        ErrorKind::Internal => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_owned(),
        ),
        kind => (kind.status(), format!("{}", err)),
    }
}

/// A serializable struct for use in HTTP error responses
///
/// This is intended to be used in the [IntoResponse] implementations for whatever error type an
/// axum handler is using.
///
/// [IntoResponse]: https://docs.rs/axum/latest/axum/response/trait.IntoResponse.html
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponseBody {
    pub error: String,
}

impl axum::response::IntoResponse for ErrorResponseBody {
    fn into_response(self) -> axum::response::Response {
        Json(self).into_response()
    }
}

/// Build the canonical error response
pub fn error_response(kind: ErrorKind, err: &impl std::fmt::Display) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (code, msg) = status_and_msg(kind, err);
    (code, Json(ErrorResponseBody { error: msg })).into_response()
}

#[cfg(test)]
mod http_tests {
    use super::*;

    #[test]
    fn internal_details_are_withheld() {
        let (code, msg) = status_and_msg(ErrorKind::Internal, &"disk on fire");
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, code);
        assert_eq!("Internal server error", msg);
        let (code, msg) = status_and_msg(ErrorKind::Conflict, &"stale write");
        assert_eq!(StatusCode::CONFLICT, code);
        assert_eq!("stale write", msg);
        assert_eq!(
            (StatusCode::UNAUTHORIZED, "Unauthorized".to_owned()),
            status_and_msg(ErrorKind::Unauthorized, &"bad password for jdoe")
        );
    }
}
