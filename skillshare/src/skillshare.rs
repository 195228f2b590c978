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

//! # Application state & top-level routing

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use chrono::Duration;
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use tracing::error;

use crate::{
    comments, metrics::Instruments, peppers::Peppers, plans, posts, resources,
    signing_keys::SigningKeys, storage::Backend as StorageBackend, users,
};

/// Application state available to all handlers
pub struct Skillshare {
    /// The host at which this instance is reachable; used as the issuer of our tokens
    pub origin: String,
    pub storage: Arc<dyn StorageBackend + Send + Sync>,
    pub exporter: PrometheusExporter,
    pub instruments: Instruments,
    pub pepper: Peppers,
    pub token_lifetime: Duration,
    pub signing_keys: SigningKeys,
}

impl Skillshare {
    pub fn new(
        origin: &str,
        storage: Arc<dyn StorageBackend + Send + Sync>,
        exporter: PrometheusExporter,
        pepper: Peppers,
        token_lifetime: Duration,
        signing_keys: SigningKeys,
    ) -> Skillshare {
        Skillshare {
            origin: origin.to_owned(),
            storage,
            exporter,
            instruments: Instruments::new("skillshare"),
            pepper,
            token_lifetime,
            signing_keys,
        }
    }
}

async fn healthcheck() -> &'static str {
    "GOOD"
}

async fn metrics(State(state): State<Arc<Skillshare>>) -> axum::response::Response {
    let mut buf = Vec::new();
    match state.exporter.export(&mut buf) {
        Ok(_) => (axum::http::StatusCode::OK, buf).into_response(),
        Err(err) => {
            error!("Failed to export metrics: {:?}", err);
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Every API route, relative to `/api/v1`
pub fn make_api_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .merge(users::make_router(state.clone()))
        .merge(posts::make_router(state.clone()))
        .merge(comments::make_router(state.clone()))
        .merge(resources::make_router(state.clone()))
        .merge(plans::make_router(state))
}

/// The API under `/api/v1`, along with `/healthcheck` & `/metrics`
///
/// Request tracing & the like are left to the caller to layer on.
pub fn make_world_router(state: Arc<Skillshare>) -> Router {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/metrics", get(metrics))
        .nest("/api/v1", make_api_router(state.clone()))
        .with_state(state)
}
