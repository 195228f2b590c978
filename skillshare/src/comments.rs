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

//! # Comments
//!
//! Comments on posts. Anyone authenticated may comment on a post that exists; only a comment's
//! author may edit or remove it.

use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Extension, Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{debug, error, info};

use crate::{
    authn::{self, authenticate},
    counter_add,
    entities::{Comment, CommentId, Post, PostId, User, UserId},
    http::{self, ErrorKind},
    metrics::{self, Sort},
    skillshare::Skillshare,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Authn { source: authn::Error },
    #[snafu(display("Comments may not be empty"))]
    EmptyComment { backtrace: Backtrace },
    #[snafu(display("User {actor} is not the author of comment {comment}"))]
    NotYourComment {
        actor: UserId,
        comment: CommentId,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authn { source } => source.kind(),
            Error::EmptyComment { .. } => ErrorKind::InvalidOperation,
            Error::NotYourComment { .. } => ErrorKind::Forbidden,
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

/// Comment on `post` on behalf of `author`
pub async fn add_comment(
    storage: &(dyn StorageBackend + Send + Sync),
    post: &PostId,
    author: &UserId,
    content: &str,
) -> Result<Comment> {
    ensure!(!content.trim().is_empty(), EmptyCommentSnafu);
    storage::fetch::<Post>(storage, post)
        .await
        .context(StorageSnafu)?;
    storage::fetch::<User>(storage, author)
        .await
        .context(StorageSnafu)?;
    let comment = Comment::new(post, author, content);
    storage::put(storage, &comment)
        .await
        .context(StorageSnafu)
}

pub async fn get_comment(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &CommentId,
) -> Result<Comment> {
    storage::fetch::<Comment>(storage, id)
        .await
        .context(StorageSnafu)
}

/// Replace the text of comment `id`; only its author may do so
pub async fn update_comment(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &CommentId,
    actor: &UserId,
    content: &str,
) -> Result<Comment> {
    ensure!(!content.trim().is_empty(), EmptyCommentSnafu);
    let mut comment = get_comment(storage, id).await?;
    ensure!(
        comment.author() == *actor,
        NotYourCommentSnafu {
            actor: *actor,
            comment: *id
        }
    );
    comment.set_content(content);
    storage::put(storage, &comment)
        .await
        .context(StorageSnafu)
}

/// Remove comment `id`; only its author may do so
pub async fn delete_comment(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &CommentId,
    actor: &UserId,
) -> Result<()> {
    let comment = get_comment(storage, id).await?;
    ensure!(
        comment.author() == *actor,
        NotYourCommentSnafu {
            actor: *actor,
            comment: *id
        }
    );
    storage::delete::<Comment>(storage, id)
        .await
        .context(StorageSnafu)
}

/// The comments on `post`, newest first
pub async fn comments_for_post(
    storage: &(dyn StorageBackend + Send + Sync),
    post: &PostId,
    page: &PageRequest,
) -> Result<Page<Comment>> {
    storage::fetch::<Post>(storage, post)
        .await
        .context(StorageSnafu)?;
    storage::query::<Comment>(
        storage,
        &Predicate::eq("post", post),
        &storage::Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

/// Remove every comment on `post`; used when the post itself goes away
pub async fn delete_comments_for_post(
    storage: &(dyn StorageBackend + Send + Sync),
    post: &PostId,
) -> Result<()> {
    let comments = storage::query_all::<Comment>(storage, &Predicate::eq("post", post))
        .await
        .context(StorageSnafu)?;
    for comment in &comments {
        storage::delete::<Comment>(storage, &comment.id())
            .await
            .context(StorageSnafu)?;
    }
    debug!("Removed {} comments on post {}", comments.len(), post);
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Handlers                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CommentView {
    pub id: CommentId,
    pub post: PostId,
    pub author: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        CommentView {
            id: comment.id(),
            post: comment.post(),
            author: comment.author(),
            content: comment.content().to_owned(),
            created_at: comment.created_at(),
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct CommentReq {
    content: String,
}

inventory::submit! { metrics::Registration::new("comments.writes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("comments.writes.failures", Sort::IntegralCounter) }

async fn list_comments(
    State(state): State<Arc<Skillshare>>,
    Path(post): Path<PostId>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match comments_for_post(state.storage.as_ref(), &post, &page.clamped()).await {
        Ok(page) => (StatusCode::OK, Json(page.map(|c| CommentView::from(&c)))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

async fn create_comment(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(post): Path<PostId>,
    Json(req): Json<CommentReq>,
) -> axum::response::Response {
    async fn create_comment1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        post: &PostId,
        req: &CommentReq,
    ) -> Result<Comment> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        add_comment(state.storage.as_ref(), post, &actor.id(), &req.content).await
    }

    match create_comment1(&state, user, &post, &req).await {
        Ok(comment) => {
            info!("{} commented on {}", comment.author(), post);
            counter_add!(state.instruments, "comments.writes.successes", 1, &[]);
            (StatusCode::CREATED, Json(CommentView::from(&comment))).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "comments.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn get_comment_handler(
    State(state): State<Arc<Skillshare>>,
    Path(id): Path<CommentId>,
) -> axum::response::Response {
    match get_comment(state.storage.as_ref(), &id).await {
        Ok(comment) => (StatusCode::OK, Json(CommentView::from(&comment))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

async fn update_comment_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<CommentId>,
    Json(req): Json<CommentReq>,
) -> axum::response::Response {
    async fn update_comment1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &CommentId,
        req: &CommentReq,
    ) -> Result<Comment> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_comment(state.storage.as_ref(), id, &actor.id(), &req.content).await
    }

    match update_comment1(&state, user, &id, &req).await {
        Ok(comment) => {
            counter_add!(state.instruments, "comments.writes.successes", 1, &[]);
            (StatusCode::OK, Json(CommentView::from(&comment))).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "comments.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn delete_comment_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<CommentId>,
) -> axum::response::Response {
    async fn delete_comment1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &CommentId,
    ) -> Result<()> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        delete_comment(state.storage.as_ref(), id, &actor.id()).await
    }

    match delete_comment1(&state, user, &id).await {
        Ok(()) => {
            info!("Deleted comment {}", id);
            counter_add!(state.instruments, "comments.writes.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "comments.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Return a router for the comments API
pub fn make_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .route(
            "/posts/{id}/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/comments/{id}",
            get(get_comment_handler)
                .put(update_comment_handler)
                .delete(delete_comment_handler),
        )
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
mod comment_tests {
    use super::*;

    use chrono::Duration;

    use crate::{entities::PostContent, memory, relationships::relationship_tests::mk_user};

    async fn mk_post(storage: &memory::Client, author: &UserId) -> Post {
        storage::put(
            storage,
            &Post::new(
                author,
                PostContent {
                    title: "Knitting circle".to_owned(),
                    content: "Thursdays at seven".to_owned(),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn comment_lifecycle() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;
        let post = mk_post(&storage, &alice.id()).await;

        let c = add_comment(&storage, &post.id(), &bob.id(), "Count me in")
            .await
            .unwrap();
        assert_eq!(bob.id(), c.author());
        assert_eq!(post.id(), c.post());

        let err = update_comment(&storage, &c.id(), &alice.id(), "Hijacked")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());

        let c = update_comment(&storage, &c.id(), &bob.id(), "Count me in; bringing yarn")
            .await
            .unwrap();
        assert_eq!("Count me in; bringing yarn", c.content());

        let err = delete_comment(&storage, &c.id(), &alice.id())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());
        delete_comment(&storage, &c.id(), &bob.id()).await.unwrap();
        assert_eq!(
            ErrorKind::NotFound,
            get_comment(&storage, &c.id()).await.unwrap_err().kind()
        );

        let err = add_comment(&storage, &PostId::new(), &bob.id(), "Anyone?")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
        let err = add_comment(&storage, &post.id(), &bob.id(), "   ")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }

    #[tokio::test]
    async fn listing_and_bulk_removal() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let post = mk_post(&storage, &alice.id()).await;
        let other = mk_post(&storage, &alice.id()).await;

        let mut ids = Vec::new();
        for i in 0..3 {
            let mut c = Comment::new(&post.id(), &alice.id(), &format!("comment {}", i));
            // Force distinct, increasing creation times
            c = serde_json::from_value({
                let mut v = serde_json::to_value(&c).unwrap();
                v["created_at"] = serde_json::Value::String(storage::timestamp_string(
                    &(Utc::now() + Duration::seconds(i)),
                ));
                v
            })
            .unwrap();
            ids.push(storage::put(&storage, &c).await.unwrap().id());
        }
        add_comment(&storage, &other.id(), &alice.id(), "elsewhere")
            .await
            .unwrap();

        let page = comments_for_post(&storage, &post.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(3, page.total);
        ids.reverse();
        assert_eq!(ids, page.items.iter().map(|c| c.id()).collect::<Vec<_>>());

        delete_comments_for_post(&storage, &post.id()).await.unwrap();
        let page = comments_for_post(&storage, &post.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(0, page.total);
        let page = comments_for_post(&storage, &other.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(1, page.total);
    }
}
