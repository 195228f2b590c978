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

//! # Posts API
//!
//! Posting, searching, and the routes that front the [feed], [commitments] & [engagement] engines
//! as they apply to posts.
//!
//! [feed]: crate::feed
//! [commitments]: crate::commitments
//! [engagement]: crate::engagement

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
    comments, commitments, counter_add,
    engagement::{self, Likeable},
    entities::{Post, PostContent, PostId, User, UserId},
    feed, gauge_setu,
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
    Comments { source: comments::Error },
    #[snafu(display("{source}"))]
    Commitments { source: commitments::Error },
    #[snafu(display("Posts must have a title"))]
    EmptyTitle { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Engagement { source: engagement::Error },
    #[snafu(display("{source}"))]
    Feed { source: feed::Error },
    #[snafu(display("User {actor} is not the author of post {post}"))]
    NotYourPost {
        actor: UserId,
        post: PostId,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authn { source } => source.kind(),
            Error::Comments { source } => source.kind(),
            Error::Commitments { source } => source.kind(),
            Error::EmptyTitle { .. } => ErrorKind::InvalidOperation,
            Error::Engagement { source } => source.kind(),
            Error::Feed { source } => source.kind(),
            Error::NotYourPost { .. } => ErrorKind::Forbidden,
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

pub async fn create_post(
    storage: &(dyn StorageBackend + Send + Sync),
    author: &UserId,
    content: PostContent,
) -> Result<Post> {
    ensure!(!content.title.trim().is_empty(), EmptyTitleSnafu);
    storage::fetch::<User>(storage, author)
        .await
        .context(StorageSnafu)?;
    storage::put(storage, &Post::new(author, content))
        .await
        .context(StorageSnafu)
}

pub async fn get_post(storage: &(dyn StorageBackend + Send + Sync), id: &PostId) -> Result<Post> {
    storage::fetch::<Post>(storage, id)
        .await
        .context(StorageSnafu)
}

/// Revise post `id`; only its author may do so. Completion is recomputed against the new goal.
pub async fn update_post(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PostId,
    actor: &UserId,
    content: PostContent,
) -> Result<Post> {
    ensure!(!content.title.trim().is_empty(), EmptyTitleSnafu);
    let mut post = get_post(storage, id).await?;
    ensure!(
        post.author() == *actor,
        NotYourPostSnafu {
            actor: *actor,
            post: *id
        }
    );
    post.revise(content);
    storage::put(storage, &post).await.context(StorageSnafu)
}

/// Delete post `id`, and the comments on it; only its author may do so
pub async fn delete_post(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PostId,
    actor: &UserId,
) -> Result<()> {
    let post = get_post(storage, id).await?;
    ensure!(
        post.author() == *actor,
        NotYourPostSnafu {
            actor: *actor,
            post: *id
        }
    );
    comments::delete_comments_for_post(storage, id)
        .await
        .context(CommentsSnafu)?;
    storage::delete::<Post>(storage, id)
        .await
        .context(StorageSnafu)
}

/// `user`'s posts, newest first
pub async fn posts_by_user(
    storage: &(dyn StorageBackend + Send + Sync),
    user: &UserId,
    page: &PageRequest,
) -> Result<Page<Post>> {
    storage::query::<Post>(
        storage,
        &Predicate::eq("author", user),
        &storage::Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

async fn search_by(
    storage: &(dyn StorageBackend + Send + Sync),
    predicate: Predicate,
    page: &PageRequest,
) -> Result<Page<Post>> {
    storage::query::<Post>(storage, &predicate, &storage::Sort::newest_first(), page)
        .await
        .context(StorageSnafu)
}

/// Posts whose title or content contains `keyword`, ignoring case; newest first
pub async fn search(
    storage: &(dyn StorageBackend + Send + Sync),
    keyword: &str,
    page: &PageRequest,
) -> Result<Page<Post>> {
    search_by(
        storage,
        Predicate::Or(vec![
            Predicate::text("title", keyword),
            Predicate::text("content", keyword),
        ]),
        page,
    )
    .await
}

pub async fn search_title(
    storage: &(dyn StorageBackend + Send + Sync),
    title: &str,
    page: &PageRequest,
) -> Result<Page<Post>> {
    search_by(storage, Predicate::text("title", title), page).await
}

pub async fn search_content(
    storage: &(dyn StorageBackend + Send + Sync),
    content: &str,
    page: &PageRequest,
) -> Result<Page<Post>> {
    search_by(storage, Predicate::text("content", content), page).await
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Views                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What the API shows of a [Post]
///
/// `liked` & `committed` are relative to the caller, and are false for anonymous callers.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct PostView {
    pub id: PostId,
    pub author: UserId,
    pub title: String,
    pub content: String,
    pub images: Vec<String>,
    pub video_url: Option<String>,
    pub like_count: usize,
    pub liked: bool,
    pub commits: Vec<UserId>,
    pub commitment_goal: u32,
    pub commitment_deadline: Option<DateTime<Utc>>,
    pub commitment_complete: bool,
    pub committed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PostView {
    pub fn new(post: &Post, viewer: Option<&UserId>) -> PostView {
        let mut commits: Vec<UserId> = post.commits().iter().copied().collect();
        commits.sort();
        PostView {
            id: post.id(),
            author: post.author(),
            title: post.title().to_owned(),
            content: post.content().to_owned(),
            images: post.images().to_vec(),
            video_url: post.video_url().map(str::to_owned),
            like_count: post.like_count(),
            liked: viewer.map(|v| post.is_liked_by(v)).unwrap_or(false),
            commitment_goal: post.commitment_goal(),
            commitment_deadline: post.commitment_deadline(),
            commitment_complete: post.commitment_complete(),
            committed: viewer.map(|v| post.commits().contains(v)).unwrap_or(false),
            commits,
            created_at: post.created_at(),
            updated_at: post.updated_at(),
        }
    }
}

fn viewer(user: &StdResult<Extension<User>, ExtensionRejection>) -> Option<UserId> {
    user.as_ref().ok().map(|Extension(u)| u.id())
}

fn page_response(page: Page<Post>, viewer: Option<&UserId>) -> axum::response::Response {
    (StatusCode::OK, Json(page.map(|p| PostView::new(&p, viewer)))).into_response()
}

// Log, count & render a failure
fn failure(state: &Skillshare, metric: &str, err: Error) -> axum::response::Response {
    match err.kind() {
        ErrorKind::Internal => error!("{:#?}", err),
        _ => info!("{}", err),
    }
    counter_add!(state.instruments, metric, 1, &[]);
    err.into_response()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                       `/posts` & `/posts/{id}`                                 //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.writes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.writes.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.queries.failures", Sort::IntegralCounter) }

async fn create_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(content): Json<PostContent>,
) -> axum::response::Response {
    async fn create1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        content: PostContent,
    ) -> Result<Post> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        create_post(state.storage.as_ref(), &actor.id(), content).await
    }

    match create1(&state, user, content).await {
        Ok(post) => {
            info!("{} posted {}", post.author(), post.id());
            counter_add!(state.instruments, "posts.writes.successes", 1, &[]);
            (
                StatusCode::CREATED,
                Json(PostView::new(&post, Some(&post.author()))),
            )
                .into_response()
        }
        Err(err) => failure(&state, "posts.writes.failures", err),
    }
}

async fn get_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
) -> axum::response::Response {
    match get_post(state.storage.as_ref(), &id).await {
        Ok(post) => (
            StatusCode::OK,
            Json(PostView::new(&post, viewer(&user).as_ref())),
        )
            .into_response(),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

async fn update_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
    Json(content): Json<PostContent>,
) -> axum::response::Response {
    async fn update1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PostId,
        content: PostContent,
    ) -> Result<Post> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_post(state.storage.as_ref(), id, &actor.id(), content).await
    }

    match update1(&state, user, &id, content).await {
        Ok(post) => {
            info!("Revised post {}", id);
            counter_add!(state.instruments, "posts.writes.successes", 1, &[]);
            (
                StatusCode::OK,
                Json(PostView::new(&post, Some(&post.author()))),
            )
                .into_response()
        }
        Err(err) => failure(&state, "posts.writes.failures", err),
    }
}

async fn delete_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
) -> axum::response::Response {
    async fn delete1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PostId,
    ) -> Result<()> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        delete_post(state.storage.as_ref(), id, &actor.id()).await
    }

    match delete1(&state, user, &id).await {
        Ok(()) => {
            info!("Deleted post {}", id);
            counter_add!(state.instruments, "posts.writes.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => failure(&state, "posts.writes.failures", err),
    }
}

async fn by_user_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(author): Path<UserId>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match posts_by_user(state.storage.as_ref(), &author, &page.clamped()).await {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Searches                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
struct KeywordReq {
    keyword: String,
}

#[derive(Clone, Debug, Deserialize)]
struct TitleReq {
    title: String,
}

#[derive(Clone, Debug, Deserialize)]
struct ContentReq {
    content: String,
}

async fn search_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(req): Query<KeywordReq>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match search(state.storage.as_ref(), &req.keyword, &page.clamped()).await {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

async fn search_title_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(req): Query<TitleReq>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match search_title(state.storage.as_ref(), &req.title, &page.clamped()).await {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

async fn search_content_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(req): Query<ContentReq>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match search_content(state.storage.as_ref(), &req.content, &page.clamped()).await {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         `/posts/feed`                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.feed.size", Sort::IntegralGauge) }

async fn feed_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    async fn feed1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        page: &PageRequest,
    ) -> Result<(UserId, Page<Post>)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let page = feed::get_feed(state.storage.as_ref(), &actor.id(), page)
            .await
            .context(FeedSnafu)?;
        Ok((actor.id(), page))
    }

    match feed1(&state, user, &page.clamped()).await {
        Ok((actor, page)) => {
            gauge_setu!(state.instruments, "posts.feed.size", page.total as u64, &[]);
            page_response(page, Some(&actor))
        }
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      `/posts/{id}/like`                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.likes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.likes.failures", Sort::IntegralCounter) }

async fn like_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
) -> axum::response::Response {
    async fn like1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PostId,
    ) -> Result<(UserId, Post)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let post = engagement::toggle_like::<Post>(state.storage.as_ref(), id, &actor.id())
            .await
            .context(EngagementSnafu)?;
        Ok((actor.id(), post))
    }

    match like1(&state, user, &id).await {
        Ok((actor, post)) => {
            counter_add!(state.instruments, "posts.likes.successes", 1, &[]);
            (StatusCode::OK, Json(PostView::new(&post, Some(&actor)))).into_response()
        }
        Err(err) => failure(&state, "posts.likes.failures", err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Commitments                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("posts.commitments.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("posts.commitments.failures", Sort::IntegralCounter) }

async fn commit_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
) -> axum::response::Response {
    async fn commit1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PostId,
    ) -> Result<(UserId, Post)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let post = commitments::commit(state.storage.as_ref(), id, &actor.id())
            .await
            .context(CommitmentsSnafu)?;
        Ok((actor.id(), post))
    }

    match commit1(&state, user, &id).await {
        Ok((actor, post)) => {
            info!("{} committed to {}", actor, id);
            counter_add!(state.instruments, "posts.commitments.successes", 1, &[]);
            (StatusCode::OK, Json(PostView::new(&post, Some(&actor)))).into_response()
        }
        Err(err) => failure(&state, "posts.commitments.failures", err),
    }
}

async fn withdraw_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PostId>,
) -> axum::response::Response {
    async fn withdraw1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PostId,
    ) -> Result<(UserId, Post)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let post = commitments::withdraw(state.storage.as_ref(), id, &actor.id())
            .await
            .context(CommitmentsSnafu)?;
        Ok((actor.id(), post))
    }

    match withdraw1(&state, user, &id).await {
        Ok((actor, post)) => {
            info!("{} withdrew from {}", actor, id);
            counter_add!(state.instruments, "posts.commitments.successes", 1, &[]);
            (StatusCode::OK, Json(PostView::new(&post, Some(&actor)))).into_response()
        }
        Err(err) => failure(&state, "posts.commitments.failures", err),
    }
}

async fn committed_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    async fn committed1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        page: &PageRequest,
    ) -> Result<(UserId, Page<Post>)> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let page = commitments::committed_posts(state.storage.as_ref(), &actor.id(), page)
            .await
            .context(CommitmentsSnafu)?;
        Ok((actor.id(), page))
    }

    match committed1(&state, user, &page.clamped()).await {
        Ok((actor, page)) => page_response(page, Some(&actor)),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

async fn active_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match commitments::active_commitments(state.storage.as_ref(), &page.clamped())
        .await
        .context(CommitmentsSnafu)
    {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

async fn open_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match commitments::open_commitments(state.storage.as_ref(), &page.clamped())
        .await
        .context(CommitmentsSnafu)
    {
        Ok(page) => page_response(page, viewer(&user).as_ref()),
        Err(err) => failure(&state, "posts.queries.failures", err),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the posts API
pub fn make_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .route("/posts", post(create_handler))
        .route(
            "/posts/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/posts/user/{user}", get(by_user_handler))
        .route("/posts/feed", get(feed_handler))
        .route("/posts/search", get(search_handler))
        .route("/posts/search/title", get(search_title_handler))
        .route("/posts/search/content", get(search_content_handler))
        .route("/posts/{id}/like", post(like_handler))
        .route("/posts/{id}/commit", post(commit_handler))
        .route("/posts/{id}/withdraw-commitment", post(withdraw_handler))
        .route("/posts/committed", get(committed_handler))
        .route("/posts/active-commitments", get(active_handler))
        .route("/posts/open-commitments", get(open_handler))
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
mod post_tests {
    use super::*;

    use crate::{
        comments::{add_comment, comments_for_post},
        memory,
        relationships::relationship_tests::mk_user,
    };

    fn content(title: &str, body: &str) -> PostContent {
        PostContent {
            title: title.to_owned(),
            content: body.to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn author_only() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;

        let post = create_post(&storage, &alice.id(), content("Sourdough", "Starter tips"))
            .await
            .unwrap();
        let err = update_post(&storage, &post.id(), &bob.id(), content("Mine now", ""))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());
        let err = delete_post(&storage, &post.id(), &bob.id())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());

        let err = create_post(&storage, &alice.id(), content("  ", "No title"))
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());

        let revised = update_post(
            &storage,
            &post.id(),
            &alice.id(),
            PostContent {
                commitment_goal: 1,
                ..content("Sourdough", "Starter tips, revised")
            },
        )
        .await
        .unwrap();
        assert_eq!("Starter tips, revised", revised.content());
        assert!(!revised.commitment_complete());
    }

    #[tokio::test]
    async fn deletion_takes_comments_along() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;
        let post = create_post(&storage, &alice.id(), content("Pottery", "Wheel time"))
            .await
            .unwrap();
        let comment = add_comment(&storage, &post.id(), &bob.id(), "I'm in")
            .await
            .unwrap();

        delete_post(&storage, &post.id(), &alice.id()).await.unwrap();
        assert_eq!(
            ErrorKind::NotFound,
            get_post(&storage, &post.id()).await.unwrap_err().kind()
        );
        assert!(storage::get::<crate::entities::Comment>(&storage, &comment.id())
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            ErrorKind::NotFound,
            comments_for_post(&storage, &post.id(), &PageRequest::default())
                .await
                .unwrap_err()
                .kind()
        );
    }

    #[tokio::test]
    async fn searches_ignore_case() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let p1 = create_post(&storage, &alice.id(), content("Learn RUST", "ownership"))
            .await
            .unwrap();
        let p2 = create_post(&storage, &alice.id(), content("Baking", "rust-colored crust"))
            .await
            .unwrap();
        create_post(&storage, &alice.id(), content("Knitting", "purl"))
            .await
            .unwrap();

        let page = search(&storage, "rust", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(2, page.total);
        let mut ids = page.items.iter().map(|p| p.id()).collect::<Vec<_>>();
        ids.sort();
        let mut expected = vec![p1.id(), p2.id()];
        expected.sort();
        assert_eq!(expected, ids);

        let page = search_title(&storage, "Rust", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(vec![p1.id()], page.items.iter().map(|p| p.id()).collect::<Vec<_>>());

        let page = search_content(&storage, "CRUST", &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(vec![p2.id()], page.items.iter().map(|p| p.id()).collect::<Vec<_>>());

        let page = posts_by_user(&storage, &alice.id(), &PageRequest::new(0, 2))
            .await
            .unwrap();
        assert_eq!(3, page.total);
        assert_eq!(2, page.items.len());
    }

    #[test]
    fn views_are_relative_to_the_viewer() {
        let alice = UserId::new();
        let bob = UserId::new();
        let mut post = Post::new(&alice, content("Chess", "Openings"));
        post.toggle_like(bob);
        post.add_commit(bob);
        let view = PostView::new(&post, Some(&bob));
        assert!(view.liked && view.committed);
        assert_eq!(1, view.like_count);
        let view = PostView::new(&post, None);
        assert!(!view.liked && !view.committed);
    }
}
