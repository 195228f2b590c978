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

//! # Learning resources
//!
//! Articles, videos, books & tools that users share, filed under a skill category.

use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, authenticate},
    counter_add,
    engagement::{self, Likeable},
    entities::{self, Resource, ResourceContent, ResourceId, ResourceType, User, UserId},
    http::{self, ErrorKind},
    metrics::{self, Sort},
    skillshare::Skillshare,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Authn { source: authn::Error },
    #[snafu(display("{source}"))]
    BadType { source: entities::Error },
    #[snafu(display("Resources must have a title and a URL"))]
    Incomplete { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Engagement { source: engagement::Error },
    #[snafu(display("User {actor} does not own resource {resource}"))]
    NotYourResource {
        actor: UserId,
        resource: ResourceId,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authn { source } => source.kind(),
            Error::BadType { .. } | Error::Incomplete { .. } => ErrorKind::InvalidOperation,
            Error::Engagement { source } => source.kind(),
            Error::NotYourResource { .. } => ErrorKind::Forbidden,
            Error::Storage { source } => source.kind(),
        }
    }
    pub fn as_status_and_msg(&self) -> (StatusCode, String) {
        http::status_and_msg(self.kind(), self)
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let (code, msg) = self.as_status_and_msg();
        (code, Json(http::ErrorResponseBody { error: msg })).into_response()
    }
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Operations                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

fn check_content(content: &ResourceContent) -> Result<()> {
    ensure!(
        !content.title.trim().is_empty() && !content.url.trim().is_empty(),
        IncompleteSnafu
    );
    Ok(())
}

pub async fn create_resource(
    storage: &(dyn StorageBackend + Send + Sync),
    owner: &UserId,
    content: ResourceContent,
) -> Result<Resource> {
    check_content(&content)?;
    storage::fetch::<User>(storage, owner)
        .await
        .context(StorageSnafu)?;
    storage::put(storage, &Resource::new(owner, content))
        .await
        .context(StorageSnafu)
}

pub async fn get_resource(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &ResourceId,
) -> Result<Resource> {
    storage::fetch::<Resource>(storage, id)
        .await
        .context(StorageSnafu)
}

async fn owned_resource(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &ResourceId,
    actor: &UserId,
) -> Result<Resource> {
    let resource = get_resource(storage, id).await?;
    ensure!(
        resource.is_owner(actor),
        NotYourResourceSnafu {
            actor: *actor,
            resource: *id
        }
    );
    Ok(resource)
}

pub async fn update_resource(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &ResourceId,
    actor: &UserId,
    content: ResourceContent,
) -> Result<Resource> {
    check_content(&content)?;
    let mut resource = owned_resource(storage, id, actor).await?;
    resource.revise(content);
    storage::put(storage, &resource).await.context(StorageSnafu)
}

pub async fn delete_resource(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &ResourceId,
    actor: &UserId,
) -> Result<()> {
    owned_resource(storage, id, actor).await?;
    storage::delete::<Resource>(storage, id)
        .await
        .context(StorageSnafu)
}

async fn list_by(
    storage: &(dyn StorageBackend + Send + Sync),
    predicate: Predicate,
    page: &PageRequest,
) -> Result<Page<Resource>> {
    storage::query::<Resource>(storage, &predicate, &storage::Sort::newest_first(), page)
        .await
        .context(StorageSnafu)
}

/// Every resource, newest first
pub async fn list_all(
    storage: &(dyn StorageBackend + Send + Sync),
    page: &PageRequest,
) -> Result<Page<Resource>> {
    list_by(storage, Predicate::All, page).await
}

/// Resources whose title, description or skill category mention `q`, ignoring case
pub async fn search(
    storage: &(dyn StorageBackend + Send + Sync),
    q: &str,
    page: &PageRequest,
) -> Result<Page<Resource>> {
    list_by(
        storage,
        Predicate::Or(vec![
            Predicate::text("title", q),
            Predicate::text("description", q),
            Predicate::text("skill_category", q),
        ]),
        page,
    )
    .await
}

pub async fn by_category(
    storage: &(dyn StorageBackend + Send + Sync),
    category: &str,
    page: &PageRequest,
) -> Result<Page<Resource>> {
    list_by(storage, Predicate::eq("skill_category", category), page).await
}

pub async fn by_type(
    storage: &(dyn StorageBackend + Send + Sync),
    resource_type: ResourceType,
    page: &PageRequest,
) -> Result<Page<Resource>> {
    list_by(storage, Predicate::eq("resource_type", resource_type), page).await
}

pub async fn by_owner(
    storage: &(dyn StorageBackend + Send + Sync),
    owner: &UserId,
    page: &PageRequest,
) -> Result<Page<Resource>> {
    list_by(storage, Predicate::eq("owner", owner), page).await
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Views                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ResourceView {
    pub id: ResourceId,
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub url: String,
    pub resource_type: ResourceType,
    pub skill_category: String,
    pub like_count: usize,
    pub liked: bool,
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
}

impl ResourceView {
    pub fn new(resource: &Resource, viewer: Option<&UserId>) -> ResourceView {
        ResourceView {
            id: resource.id(),
            owner: resource.owner(),
            title: resource.title().to_owned(),
            description: resource.description().to_owned(),
            url: resource.url().to_owned(),
            resource_type: resource.resource_type(),
            skill_category: resource.skill_category().to_owned(),
            like_count: resource.like_count(),
            liked: viewer.map(|v| resource.is_liked_by(v)).unwrap_or(false),
            is_owner: viewer.map(|v| resource.is_owner(v)).unwrap_or(false),
            created_at: resource.created_at(),
        }
    }
}

fn viewer(user: &StdResult<Extension<User>, ExtensionRejection>) -> Option<UserId> {
    user.as_ref().ok().map(|Extension(u)| u.id())
}

fn listing(
    state: &Skillshare,
    result: Result<Page<Resource>>,
    viewer: Option<UserId>,
) -> axum::response::Response {
    match result {
        Ok(page) => (
            StatusCode::OK,
            Json(page.map(|r| ResourceView::new(&r, viewer.as_ref()))),
        )
            .into_response(),
        Err(err) => {
            info!("{}", err);
            counter_add!(state.instruments, "resources.queries.failures", 1, &[]);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            handlers                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("resources.writes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("resources.writes.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("resources.queries.failures", Sort::IntegralCounter) }

async fn list_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    let result = list_all(state.storage.as_ref(), &page.clamped()).await;
    listing(&state, result, viewer(&user))
}

async fn create_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(content): Json<ResourceContent>,
) -> axum::response::Response {
    async fn create1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        content: ResourceContent,
    ) -> Result<Resource> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        create_resource(state.storage.as_ref(), &actor.id(), content).await
    }

    match create1(&state, user, content).await {
        Ok(resource) => {
            info!("{} shared resource {}", resource.owner(), resource.id());
            counter_add!(state.instruments, "resources.writes.successes", 1, &[]);
            (
                StatusCode::CREATED,
                Json(ResourceView::new(&resource, Some(&resource.owner()))),
            )
                .into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "resources.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn get_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<ResourceId>,
) -> axum::response::Response {
    match get_resource(state.storage.as_ref(), &id).await {
        Ok(resource) => (
            StatusCode::OK,
            Json(ResourceView::new(&resource, viewer(&user).as_ref())),
        )
            .into_response(),
        Err(err) => {
            info!("{}", err);
            counter_add!(state.instruments, "resources.queries.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn update_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<ResourceId>,
    Json(content): Json<ResourceContent>,
) -> axum::response::Response {
    async fn update1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &ResourceId,
        content: ResourceContent,
    ) -> Result<Resource> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_resource(state.storage.as_ref(), id, &actor.id(), content).await
    }

    match update1(&state, user, &id, content).await {
        Ok(resource) => {
            info!("Revised resource {}", id);
            counter_add!(state.instruments, "resources.writes.successes", 1, &[]);
            (
                StatusCode::OK,
                Json(ResourceView::new(&resource, Some(&resource.owner()))),
            )
                .into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "resources.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn delete_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<ResourceId>,
) -> axum::response::Response {
    async fn delete1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &ResourceId,
    ) -> Result<()> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        delete_resource(state.storage.as_ref(), id, &actor.id()).await
    }

    match delete1(&state, user, &id).await {
        Ok(()) => {
            info!("Deleted resource {}", id);
            counter_add!(state.instruments, "resources.writes.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "resources.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct SearchReq {
    q: String,
}

async fn search_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(req): Query<SearchReq>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    let result = search(state.storage.as_ref(), &req.q, &page.clamped()).await;
    listing(&state, result, viewer(&user))
}

async fn category_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(category): Path<String>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    let result = by_category(state.storage.as_ref(), &category, &page.clamped()).await;
    listing(&state, result, viewer(&user))
}

async fn type_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(resource_type): Path<String>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    let result = match resource_type.parse::<ResourceType>().context(BadTypeSnafu) {
        Ok(resource_type) => by_type(state.storage.as_ref(), resource_type, &page.clamped()).await,
        Err(err) => Err(err),
    };
    listing(&state, result, viewer(&user))
}

async fn owner_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(owner): Path<UserId>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    let result = by_owner(state.storage.as_ref(), &owner, &page.clamped()).await;
    listing(&state, result, viewer(&user))
}

inventory::submit! { metrics::Registration::new("resources.likes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("resources.likes.failures", Sort::IntegralCounter) }

async fn like_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<ResourceId>,
) -> axum::response::Response {
    async fn like1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &ResourceId,
    ) -> Result<(UserId, Resource)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let resource =
            engagement::toggle_like::<Resource>(state.storage.as_ref(), id, &actor.id())
                .await
                .context(EngagementSnafu)?;
        Ok((actor.id(), resource))
    }

    match like1(&state, user, &id).await {
        Ok((actor, resource)) => {
            counter_add!(state.instruments, "resources.likes.successes", 1, &[]);
            (
                StatusCode::OK,
                Json(ResourceView::new(&resource, Some(&actor))),
            )
                .into_response()
        }
        Err(err) => {
            info!("{}", err);
            counter_add!(state.instruments, "resources.likes.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Return a router for the resources API
pub fn make_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .route("/resources", get(list_handler).post(create_handler))
        .route(
            "/resources/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/resources/search", get(search_handler))
        .route("/resources/category/{category}", get(category_handler))
        .route("/resources/type/{type}", get(type_handler))
        .route("/resources/user/{user}", get(owner_handler))
        .route("/resources/{id}/like", post(like_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod resource_tests {
    use super::*;

    use crate::{memory, relationships::relationship_tests::mk_user};

    fn content(title: &str, category: &str, resource_type: ResourceType) -> ResourceContent {
        ResourceContent {
            title: title.to_owned(),
            description: format!("All about {}", title),
            url: "https://example.com/r".to_owned(),
            resource_type,
            skill_category: category.to_owned(),
        }
    }

    #[tokio::test]
    async fn ownership() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;

        let r = create_resource(
            &storage,
            &alice.id(),
            content("The Rust Book", "Programming", ResourceType::Book),
        )
        .await
        .unwrap();
        let err = update_resource(
            &storage,
            &r.id(),
            &bob.id(),
            content("Mine", "Programming", ResourceType::Book),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());
        let err = delete_resource(&storage, &r.id(), &bob.id())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());

        let r = update_resource(
            &storage,
            &r.id(),
            &alice.id(),
            content("The Rust Book, 2nd ed.", "Programming", ResourceType::Book),
        )
        .await
        .unwrap();
        assert_eq!("The Rust Book, 2nd ed.", r.title());

        let view = ResourceView::new(&r, Some(&alice.id()));
        assert!(view.is_owner && !view.liked);
        let view = ResourceView::new(&r, Some(&bob.id()));
        assert!(!view.is_owner);

        delete_resource(&storage, &r.id(), &alice.id()).await.unwrap();
        assert_eq!(
            ErrorKind::NotFound,
            get_resource(&storage, &r.id()).await.unwrap_err().kind()
        );
    }

    #[tokio::test]
    async fn queries() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;
        let req = PageRequest::default();

        create_resource(
            &storage,
            &alice.id(),
            content("Knife skills", "Cooking", ResourceType::Video),
        )
        .await
        .unwrap();
        create_resource(
            &storage,
            &bob.id(),
            content("Rustlings", "Programming", ResourceType::Tool),
        )
        .await
        .unwrap();
        create_resource(
            &storage,
            &bob.id(),
            content("Stock from scratch", "cooking", ResourceType::Article),
        )
        .await
        .unwrap();

        assert_eq!(3, list_all(&storage, &req).await.unwrap().total);
        // Exact match on category...
        assert_eq!(1, by_category(&storage, "Cooking", &req).await.unwrap().total);
        // ...but search is case-insensitive across all three fields
        assert_eq!(2, search(&storage, "COOKING", &req).await.unwrap().total);
        assert_eq!(1, search(&storage, "rustl", &req).await.unwrap().total);
        assert_eq!(
            1,
            by_type(&storage, ResourceType::Tool, &req)
                .await
                .unwrap()
                .total
        );
        assert_eq!(2, by_owner(&storage, &bob.id(), &req).await.unwrap().total);

        let err = create_resource(
            &storage,
            &alice.id(),
            content("", "Cooking", ResourceType::Video),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }
}
