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

//! # Learning plans
//!
//! Every operation here, reads included, is restricted to the plan's owner.

use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::Deserialize;
use snafu::{prelude::*, Backtrace};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, authenticate},
    counter_add,
    entities::{
        LearningPlan, Milestone, MilestoneContent, MilestoneId, PlanContent, PlanId, User, UserId,
    },
    http::{self, ErrorKind},
    metrics::{self, Sort},
    skillshare::Skillshare,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Authn { source: authn::Error },
    #[snafu(display("Plans & milestones must have a title"))]
    EmptyTitle { backtrace: Backtrace },
    #[snafu(display("Plan {plan} has no milestone {milestone}"))]
    NoSuchMilestone {
        plan: PlanId,
        milestone: MilestoneId,
        backtrace: Backtrace,
    },
    #[snafu(display("User {actor} does not own learning plan {plan}"))]
    NotYourPlan {
        actor: UserId,
        plan: PlanId,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authn { source } => source.kind(),
            Error::EmptyTitle { .. } => ErrorKind::InvalidOperation,
            Error::NoSuchMilestone { .. } => ErrorKind::NotFound,
            Error::NotYourPlan { .. } => ErrorKind::Forbidden,
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

pub async fn create_plan(
    storage: &(dyn StorageBackend + Send + Sync),
    owner: &UserId,
    content: PlanContent,
) -> Result<LearningPlan> {
    ensure!(!content.title.trim().is_empty(), EmptyTitleSnafu);
    storage::fetch::<User>(storage, owner)
        .await
        .context(StorageSnafu)?;
    storage::put(storage, &LearningPlan::new(owner, content))
        .await
        .context(StorageSnafu)
}

/// Retrieve plan `id` on behalf of `actor`, who must own it
pub async fn get_plan(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    actor: &UserId,
) -> Result<LearningPlan> {
    let plan = storage::fetch::<LearningPlan>(storage, id)
        .await
        .context(StorageSnafu)?;
    ensure!(
        plan.is_owner(actor),
        NotYourPlanSnafu {
            actor: *actor,
            plan: *id
        }
    );
    Ok(plan)
}

pub async fn update_plan(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    actor: &UserId,
    content: PlanContent,
) -> Result<LearningPlan> {
    ensure!(!content.title.trim().is_empty(), EmptyTitleSnafu);
    let mut plan = get_plan(storage, id, actor).await?;
    plan.revise(content);
    storage::put(storage, &plan).await.context(StorageSnafu)
}

pub async fn delete_plan(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    actor: &UserId,
) -> Result<()> {
    get_plan(storage, id, actor).await?;
    storage::delete::<LearningPlan>(storage, id)
        .await
        .context(StorageSnafu)
}

/// `user`'s plans, newest first
pub async fn plans_by_user(
    storage: &(dyn StorageBackend + Send + Sync),
    user: &UserId,
    page: &PageRequest,
) -> Result<Page<LearningPlan>> {
    storage::query::<LearningPlan>(
        storage,
        &Predicate::eq("owner", user),
        &storage::Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

pub async fn add_milestone(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    actor: &UserId,
    content: MilestoneContent,
) -> Result<LearningPlan> {
    ensure!(!content.title.trim().is_empty(), EmptyTitleSnafu);
    let mut plan = get_plan(storage, id, actor).await?;
    plan.add_milestone(Milestone::new(content));
    storage::put(storage, &plan).await.context(StorageSnafu)
}

pub async fn set_milestone_completed(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    milestone: &MilestoneId,
    actor: &UserId,
    completed: bool,
) -> Result<LearningPlan> {
    let mut plan = get_plan(storage, id, actor).await?;
    ensure!(
        plan.set_milestone_completed(milestone, completed),
        NoSuchMilestoneSnafu {
            plan: *id,
            milestone: *milestone
        }
    );
    storage::put(storage, &plan).await.context(StorageSnafu)
}

pub async fn remove_milestone(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &PlanId,
    milestone: &MilestoneId,
    actor: &UserId,
) -> Result<LearningPlan> {
    let mut plan = get_plan(storage, id, actor).await?;
    ensure!(
        plan.remove_milestone(milestone),
        NoSuchMilestoneSnafu {
            plan: *id,
            milestone: *milestone
        }
    );
    storage::put(storage, &plan).await.context(StorageSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            handlers                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("plans.writes.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("plans.writes.failures", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("plans.queries.failures", Sort::IntegralCounter) }

// Log, count & render the outcome of a plan operation
fn respond<T: serde::Serialize>(
    state: &Skillshare,
    result: Result<T>,
    code: StatusCode,
    success: Option<&str>,
    failure: &str,
) -> axum::response::Response {
    match result {
        Ok(t) => {
            if let Some(success) = success {
                counter_add!(state.instruments, success, 1, &[]);
            }
            (code, Json(t)).into_response()
        }
        Err(err) => {
            match err.kind() {
                ErrorKind::Internal => error!("{:#?}", err),
                _ => info!("{}", err),
            }
            counter_add!(state.instruments, failure, 1, &[]);
            err.into_response()
        }
    }
}

async fn list_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    async fn list1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        page: &PageRequest,
    ) -> Result<Page<LearningPlan>> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        plans_by_user(state.storage.as_ref(), &actor.id(), page).await
    }

    let result = list1(&state, user, &page.clamped()).await;
    respond(&state, result, StatusCode::OK, None, "plans.queries.failures")
}

async fn create_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Json(content): Json<PlanContent>,
) -> axum::response::Response {
    async fn create1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        content: PlanContent,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        let plan = create_plan(state.storage.as_ref(), &actor.id(), content).await?;
        info!("{} created learning plan {}", actor.id(), plan.id());
        Ok(plan)
    }

    let result = create1(&state, user, content).await;
    respond(
        &state,
        result,
        StatusCode::CREATED,
        Some("plans.writes.successes"),
        "plans.writes.failures",
    )
}

async fn get_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PlanId>,
) -> axum::response::Response {
    async fn get1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        get_plan(state.storage.as_ref(), id, &actor.id()).await
    }

    let result = get1(&state, user, &id).await;
    respond(&state, result, StatusCode::OK, None, "plans.queries.failures")
}

async fn update_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PlanId>,
    Json(content): Json<PlanContent>,
) -> axum::response::Response {
    async fn update1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
        content: PlanContent,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_plan(state.storage.as_ref(), id, &actor.id(), content).await
    }

    let result = update1(&state, user, &id, content).await;
    respond(
        &state,
        result,
        StatusCode::OK,
        Some("plans.writes.successes"),
        "plans.writes.failures",
    )
}

async fn delete_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PlanId>,
) -> axum::response::Response {
    async fn delete1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
    ) -> Result<()> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        delete_plan(state.storage.as_ref(), id, &actor.id()).await
    }

    match delete1(&state, user, &id).await {
        Ok(()) => {
            info!("Deleted learning plan {}", id);
            counter_add!(state.instruments, "plans.writes.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "plans.writes.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn add_milestone_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<PlanId>,
    Json(content): Json<MilestoneContent>,
) -> axum::response::Response {
    async fn add1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
        content: MilestoneContent,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        add_milestone(state.storage.as_ref(), id, &actor.id(), content).await
    }

    let result = add1(&state, user, &id, content).await;
    respond(
        &state,
        result,
        StatusCode::CREATED,
        Some("plans.writes.successes"),
        "plans.writes.failures",
    )
}

#[derive(Clone, Debug, Deserialize)]
struct CompletedReq {
    completed: bool,
}

async fn complete_milestone_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path((id, milestone)): Path<(PlanId, MilestoneId)>,
    Json(req): Json<CompletedReq>,
) -> axum::response::Response {
    async fn complete1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
        milestone: &MilestoneId,
        completed: bool,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        set_milestone_completed(state.storage.as_ref(), id, milestone, &actor.id(), completed)
            .await
    }

    let result = complete1(&state, user, &id, &milestone, req.completed).await;
    respond(
        &state,
        result,
        StatusCode::OK,
        Some("plans.writes.successes"),
        "plans.writes.failures",
    )
}

async fn remove_milestone_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path((id, milestone)): Path<(PlanId, MilestoneId)>,
) -> axum::response::Response {
    async fn remove1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &PlanId,
        milestone: &MilestoneId,
    ) -> Result<LearningPlan> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        remove_milestone(state.storage.as_ref(), id, milestone, &actor.id()).await
    }

    let result = remove1(&state, user, &id, &milestone).await;
    respond(
        &state,
        result,
        StatusCode::OK,
        Some("plans.writes.successes"),
        "plans.writes.failures",
    )
}

/// Return a router for the learning plans API
pub fn make_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .route("/plans", get(list_handler).post(create_handler))
        .route(
            "/plans/{id}",
            get(get_handler).put(update_handler).delete(delete_handler),
        )
        .route("/plans/{id}/milestones", post(add_milestone_handler))
        .route(
            "/plans/{id}/milestones/{milestone}",
            put(complete_milestone_handler).delete(remove_milestone_handler),
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
mod plan_tests {
    use super::*;

    use crate::{memory, relationships::relationship_tests::mk_user};

    fn milestone(title: &str) -> MilestoneContent {
        MilestoneContent {
            title: title.to_owned(),
            description: String::new(),
            target_date: None,
        }
    }

    #[tokio::test]
    async fn milestones_drive_progress() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;

        let plan = create_plan(
            &storage,
            &alice.id(),
            PlanContent {
                title: "Learn Spanish".to_owned(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(0, plan.progress());

        add_milestone(&storage, &plan.id(), &alice.id(), milestone("Greetings"))
            .await
            .unwrap();
        add_milestone(&storage, &plan.id(), &alice.id(), milestone("Numbers"))
            .await
            .unwrap();
        let plan = add_milestone(&storage, &plan.id(), &alice.id(), milestone("Verbs"))
            .await
            .unwrap();
        assert_eq!(3, plan.milestones().len());

        let first = plan.milestones()[0].id();
        let plan = set_milestone_completed(&storage, &plan.id(), &first, &alice.id(), true)
            .await
            .unwrap();
        assert_eq!(33, plan.progress());

        let second = plan.milestones()[1].id();
        let plan = set_milestone_completed(&storage, &plan.id(), &second, &alice.id(), true)
            .await
            .unwrap();
        assert_eq!(67, plan.progress());

        let third = plan.milestones()[2].id();
        let plan = remove_milestone(&storage, &plan.id(), &third, &alice.id())
            .await
            .unwrap();
        assert_eq!(100, plan.progress());

        let err = remove_milestone(&storage, &plan.id(), &third, &alice.id())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn owner_only() {
        let storage = memory::Client::new();
        let alice = mk_user(&storage, "Alice").await;
        let bob = mk_user(&storage, "Bob").await;

        let plan = create_plan(
            &storage,
            &alice.id(),
            PlanContent {
                title: "Marathon".to_owned(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        for err in [
            get_plan(&storage, &plan.id(), &bob.id()).await.unwrap_err(),
            update_plan(
                &storage,
                &plan.id(),
                &bob.id(),
                PlanContent {
                    title: "Half".to_owned(),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err(),
            add_milestone(&storage, &plan.id(), &bob.id(), milestone("10k"))
                .await
                .unwrap_err(),
            delete_plan(&storage, &plan.id(), &bob.id())
                .await
                .unwrap_err(),
        ] {
            assert_eq!(ErrorKind::Forbidden, err.kind());
        }

        let page = plans_by_user(&storage, &alice.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(1, page.total);
        assert!(plans_by_user(&storage, &bob.id(), &PageRequest::default())
            .await
            .unwrap()
            .items
            .is_empty());

        delete_plan(&storage, &plan.id(), &alice.id()).await.unwrap();
        assert_eq!(
            ErrorKind::NotFound,
            get_plan(&storage, &plan.id(), &alice.id())
                .await
                .unwrap_err()
                .kind()
        );
    }
}
