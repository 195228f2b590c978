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

//! # User API
//!
//! Registration, login, profiles, passwords, account deletion & the follow graph as seen from the
//! outside. The operations are plain async functions over a storage [Backend]; the handlers at the
//! bottom of the module adapt them to HTTP.
//!
//! [Backend]: crate::storage::Backend

use std::sync::Arc;

use axum::{
    extract::{rejection::ExtensionRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Extension, Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use tap::Pipe;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer};
use tracing::{error, info};

use crate::{
    authn::{self, authenticate},
    counter_add,
    entities::{self, DisplayName, ProfileUpdate, User, UserEmail, UserId},
    http::{self, ErrorKind},
    metrics::{self, Sort},
    peppers::{self, Peppers},
    relationships,
    signing_keys::{self, SigningKeys},
    skillshare::Skillshare,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate},
    token::{self, mint_token},
};

/// The longest bio we'll accept, in characters
pub const MAX_BIO_LENGTH: usize = 500;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
    Authn { source: authn::Error },
    #[snafu(display("Bios are limited to {MAX_BIO_LENGTH} characters; this one has {length}"))]
    BioTooLong { length: usize, backtrace: Backtrace },
    #[snafu(display("The e-mail address {email} is already registered"))]
    EmailClaimed {
        email: UserEmail,
        backtrace: Backtrace,
    },
    #[snafu(display("Incorrect credentials for {email}"))]
    IncorrectCredentials { email: UserEmail },
    #[snafu(display("The current password didn't verify: {source}"))]
    IncorrectPassword { source: entities::Error },
    #[snafu(display("No signing keys found ({source}); did you configure the program?"))]
    NoKeys { source: signing_keys::Error },
    #[snafu(display("No pepper found ({source}); did you configure the program?"))]
    NoPepper { source: peppers::Error },
    #[snafu(display("User {actor} may not modify the account of user {target}"))]
    NotYourAccount {
        actor: UserId,
        target: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("The password & its confirmation don't match"))]
    PasswordMismatch { backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Relationships { source: relationships::Error },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
    #[snafu(display("Failed to mint a token for {id}: {source}"))]
    Token { id: UserId, source: token::Error },
    #[snafu(display("{source}"))]
    UserEntity { source: entities::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Authn { source } => source.kind(),
            Error::BioTooLong { .. } | Error::PasswordMismatch { .. } => {
                ErrorKind::InvalidOperation
            }
            Error::EmailClaimed { .. } => ErrorKind::Conflict,
            Error::IncorrectCredentials { .. } | Error::IncorrectPassword { .. } => {
                ErrorKind::Unauthorized
            }
            Error::NoKeys { .. } | Error::NoPepper { .. } | Error::Token { .. } => {
                ErrorKind::Internal
            }
            Error::NotYourAccount { .. } => ErrorKind::Forbidden,
            Error::Relationships { source } => source.kind(),
            Error::Storage { source } => source.kind(),
            Error::UserEntity { source } => source.kind(),
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

/// Look-up a user by e-mail address; `None` means there is no such user
pub async fn user_for_email(
    storage: &(dyn StorageBackend + Send + Sync),
    email: &UserEmail,
) -> storage::Result<Option<User>> {
    storage::query::<User>(
        storage,
        &Predicate::eq("email", email),
        &storage::Sort::ascending("id"),
        &PageRequest::new(0, 1),
    )
    .await?
    .items
    .into_iter()
    .next()
    .pipe(Ok)
}

/// Register a new user
///
/// `email` must not already be registered. The uniqueness check here is best-effort; backends with
/// a unique index on e-mail (Mongo) will also refuse a racing duplicate with `Conflict`.
pub async fn register(
    storage: &(dyn StorageBackend + Send + Sync),
    peppers: &Peppers,
    name: &DisplayName,
    email: &UserEmail,
    password: &SecretString,
    confirm_password: &SecretString,
) -> Result<User> {
    use secrecy::ExposeSecret;
    ensure!(
        password.expose_secret() == confirm_password.expose_secret(),
        PasswordMismatchSnafu
    );
    ensure!(
        user_for_email(storage, email)
            .await
            .context(StorageSnafu)?
            .is_none(),
        EmailClaimedSnafu {
            email: email.clone()
        }
    );
    let (pepper_ver, pepper) = peppers.current_pepper().context(NoPepperSnafu)?;
    let user = User::new(&pepper_ver, &pepper, email, name, password).context(UserEntitySnafu)?;
    storage::put(storage, &user).await.context(StorageSnafu)
}

/// Check `email` & `password`, and mint a token for the user on success
pub async fn login(
    storage: &(dyn StorageBackend + Send + Sync),
    peppers: &Peppers,
    signing_keys: &SigningKeys,
    issuer: &str,
    token_lifetime: &Duration,
    email: &UserEmail,
    password: SecretString,
) -> Result<(String, User)> {
    let user = authn::check_password(storage, peppers, email, password)
        .await
        .map_err(|err| match err.kind() {
            // Don't distinguish unknown users from bad passwords
            ErrorKind::Unauthorized => IncorrectCredentialsSnafu {
                email: email.clone(),
            }
            .build(),
            _ => AuthnSnafu.into_error(err),
        })?;
    let (keyid, signing_key) = signing_keys.current().context(NoKeysSnafu)?;
    let token = mint_token(&user.id(), &keyid, &signing_key, issuer, token_lifetime)
        .context(TokenSnafu { id: user.id() })?;
    Ok((token, user))
}

/// Verify a token, returning the user it names
pub async fn validate(
    storage: &(dyn StorageBackend + Send + Sync),
    signing_keys: &SigningKeys,
    issuer: &str,
    token: &str,
) -> Result<User> {
    authn::check_token(storage, token, signing_keys, issuer)
        .await
        .context(AuthnSnafu)
}

pub async fn get_user(storage: &(dyn StorageBackend + Send + Sync), id: &UserId) -> Result<User> {
    storage::fetch::<User>(storage, id)
        .await
        .context(StorageSnafu)
}

/// Look-up a user by e-mail address, failing with NotFound if there's no such user
pub async fn user_by_email(
    storage: &(dyn StorageBackend + Send + Sync),
    email: &UserEmail,
) -> Result<User> {
    user_for_email(storage, email)
        .await
        .context(StorageSnafu)?
        .context(storage::NotFoundSnafu {
            kind: storage::Kind::User,
            id: email.to_string(),
        })
        .context(StorageSnafu)
}

/// Apply a partial update to `target`'s profile; only `target` may do so
pub async fn update_profile(
    storage: &(dyn StorageBackend + Send + Sync),
    actor: &UserId,
    target: &UserId,
    update: ProfileUpdate,
) -> Result<User> {
    ensure!(
        actor == target,
        NotYourAccountSnafu {
            actor: *actor,
            target: *target
        }
    );
    if let Some(bio) = update.bio.as_deref() {
        let length = bio.chars().count();
        ensure!(length <= MAX_BIO_LENGTH, BioTooLongSnafu { length });
    }
    let mut user = get_user(storage, target).await?;
    user.apply(update);
    storage::put(storage, &user).await.context(StorageSnafu)
}

/// Change `target`'s password; only `target` may do so, and only with their current password
pub async fn update_password(
    storage: &(dyn StorageBackend + Send + Sync),
    peppers: &Peppers,
    actor: &UserId,
    target: &UserId,
    current: SecretString,
    new: &SecretString,
) -> Result<User> {
    ensure!(
        actor == target,
        NotYourAccountSnafu {
            actor: *actor,
            target: *target
        }
    );
    let mut user = get_user(storage, target).await?;
    user.check_password(peppers, current)
        .context(IncorrectPasswordSnafu)?;
    user.set_password(peppers, new).context(UserEntitySnafu)?;
    storage::put(storage, &user).await.context(StorageSnafu)
}

/// The users following `id`
pub async fn followers(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &UserId,
    page: &PageRequest,
) -> Result<Page<User>> {
    get_user(storage, id).await?;
    storage::query::<User>(
        storage,
        &Predicate::contains("following", id),
        &storage::Sort::ascending("name"),
        page,
    )
    .await
    .context(StorageSnafu)
}

/// The users `id` follows
pub async fn following(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &UserId,
    page: &PageRequest,
) -> Result<Page<User>> {
    get_user(storage, id).await?;
    storage::query::<User>(
        storage,
        &Predicate::contains("followers", id),
        &storage::Sort::ascending("name"),
        page,
    )
    .await
    .context(StorageSnafu)
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Views                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// What the API shows of a [User]; never the password hash
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UserView {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub location: Option<String>,
    pub occupation: Option<String>,
    pub website: Option<String>,
    pub join_date: DateTime<Utc>,
    pub followers: Vec<UserId>,
    pub following: Vec<UserId>,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        let mut followers: Vec<UserId> = user.followers().iter().copied().collect();
        followers.sort();
        let mut following: Vec<UserId> = user.following().iter().copied().collect();
        following.sort();
        UserView {
            id: user.id(),
            email: user.email().to_string(),
            name: user.name().to_string(),
            bio: user.bio().map(str::to_owned),
            profile_picture: user.profile_picture().map(str::to_owned),
            location: user.location().map(str::to_owned),
            occupation: user.occupation().map(str::to_owned),
            website: user.website().map(str::to_owned),
            join_date: user.join_date(),
            followers,
            following,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/auth/*`                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

inventory::submit! { metrics::Registration::new("users.registrations.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.registrations.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct RegisterReq {
    name: DisplayName,
    email: UserEmail,
    password: SecretString,
    #[serde(rename = "confirmPassword", alias = "confirm_password")]
    confirm_password: SecretString,
}

/// Register as a new user
///
/// Unlike most endpoints in this API, there is no authentication on this method.
async fn register_handler(
    State(state): State<Arc<Skillshare>>,
    Json(req): Json<RegisterReq>,
) -> axum::response::Response {
    match register(
        state.storage.as_ref(),
        &state.pepper,
        &req.name,
        &req.email,
        &req.password,
        &req.confirm_password,
    )
    .await
    {
        Ok(user) => {
            info!("Registered user {} ({})", user.id(), user.email());
            counter_add!(state.instruments, "users.registrations.successes", 1, &[]);
            (StatusCode::CREATED, Json(UserView::from(&user))).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.registrations.failures", 1, &[]);
            err.into_response()
        }
    }
}

inventory::submit! { metrics::Registration::new("users.logins.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.logins.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize)]
struct LoginReq {
    email: UserEmail,
    password: SecretString,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoginRsp {
    pub token: String,
    pub user: UserView,
}

/// Login as an existing user
///
/// This endpoint will vend a time-limited JWT that can be supplied in the Authorization header
/// (with the bearer scheme) in subsequent requests.
async fn login_handler(
    State(state): State<Arc<Skillshare>>,
    Json(req): Json<LoginReq>,
) -> axum::response::Response {
    match login(
        state.storage.as_ref(),
        &state.pepper,
        &state.signing_keys,
        &state.origin,
        &state.token_lifetime,
        &req.email,
        req.password,
    )
    .await
    {
        Ok((token, user)) => {
            info!("{} logged-in", user.id());
            counter_add!(state.instruments, "users.logins.successes", 1, &[]);
            (
                StatusCode::OK,
                Json(LoginRsp {
                    token,
                    user: UserView::from(&user),
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.logins.failures", 1, &[]);
            err.into_response()
        }
    }
}

/// Echo back the authenticated user; a cheap way for a client to check its token
async fn validate_handler(
    user: StdResult<Extension<User>, ExtensionRejection>,
) -> axum::response::Response {
    match authn::actor(user).context(AuthnSnafu) {
        Ok(user) => (StatusCode::OK, Json(UserView::from(&user))).into_response(),
        Err(err) => err.into_response(),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           `/users/*`                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

async fn get_user_handler(
    State(state): State<Arc<Skillshare>>,
    Path(id): Path<UserId>,
) -> axum::response::Response {
    match get_user(state.storage.as_ref(), &id).await {
        Ok(user) => (StatusCode::OK, Json(UserView::from(&user))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

async fn user_by_email_handler(
    State(state): State<Arc<Skillshare>>,
    Path(email): Path<UserEmail>,
) -> axum::response::Response {
    match user_by_email(state.storage.as_ref(), &email).await {
        Ok(user) => (StatusCode::OK, Json(UserView::from(&user))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

inventory::submit! { metrics::Registration::new("users.updates.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.updates.failures", Sort::IntegralCounter) }

async fn update_profile_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<UserId>,
    Json(update): Json<ProfileUpdate>,
) -> axum::response::Response {
    async fn update_profile1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &UserId,
        update: ProfileUpdate,
    ) -> Result<User> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_profile(state.storage.as_ref(), &actor.id(), id, update).await
    }

    match update_profile1(&state, user, &id, update).await {
        Ok(user) => {
            info!("Updated the profile of {}", id);
            counter_add!(state.instruments, "users.updates.successes", 1, &[]);
            (StatusCode::OK, Json(UserView::from(&user))).into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.updates.failures", 1, &[]);
            err.into_response()
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
struct PasswordReq {
    #[serde(rename = "currentPassword", alias = "current_password")]
    current_password: SecretString,
    #[serde(rename = "newPassword", alias = "new_password")]
    new_password: SecretString,
}

async fn update_password_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<UserId>,
    Json(req): Json<PasswordReq>,
) -> axum::response::Response {
    async fn update_password1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &UserId,
        req: PasswordReq,
    ) -> Result<User> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        update_password(
            state.storage.as_ref(),
            &state.pepper,
            &actor.id(),
            id,
            req.current_password,
            &req.new_password,
        )
        .await
    }

    match update_password1(&state, user, &id, req).await {
        Ok(_) => {
            info!("Changed the password of {}", id);
            counter_add!(state.instruments, "users.updates.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.updates.failures", 1, &[]);
            err.into_response()
        }
    }
}

inventory::submit! { metrics::Registration::new("users.deletions.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.deletions.failures", Sort::IntegralCounter) }

async fn delete_user_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<UserId>,
) -> axum::response::Response {
    async fn delete_user1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &UserId,
    ) -> Result<()> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        relationships::delete_user(state.storage.as_ref(), &actor.id(), id)
            .await
            .context(RelationshipsSnafu)
    }

    match delete_user1(&state, user, &id).await {
        Ok(_) => {
            info!("Deleted user {}", id);
            counter_add!(state.instruments, "users.deletions.successes", 1, &[]);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.deletions.failures", 1, &[]);
            err.into_response()
        }
    }
}

inventory::submit! { metrics::Registration::new("users.follows.successes", Sort::IntegralCounter) }
inventory::submit! { metrics::Registration::new("users.follows.failures", Sort::IntegralCounter) }

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct FollowRsp {
    /// Whether the caller now follows the target
    pub following: bool,
    pub user: UserView,
}

async fn follow_handler(
    State(state): State<Arc<Skillshare>>,
    user: StdResult<Extension<User>, ExtensionRejection>,
    Path(id): Path<UserId>,
) -> axum::response::Response {
    async fn follow1(
        state: &Skillshare,
        user: StdResult<Extension<User>, ExtensionRejection>,
        id: &UserId,
    ) -> Result<User> {
        let actor = authn::actor(user).context(AuthnSnafu)?;
        relationships::toggle_follow(state.storage.as_ref(), &actor.id(), id)
            .await
            .context(RelationshipsSnafu)
    }

    match follow1(&state, user, &id).await {
        Ok(user) => {
            let following = user.is_following(&id);
            info!(
                "{} {} {}",
                user.id(),
                if following { "follows" } else { "unfollows" },
                id
            );
            counter_add!(state.instruments, "users.follows.successes", 1, &[]);
            (
                StatusCode::OK,
                Json(FollowRsp {
                    following,
                    user: UserView::from(&user),
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("{:#?}", err);
            counter_add!(state.instruments, "users.follows.failures", 1, &[]);
            err.into_response()
        }
    }
}

async fn followers_handler(
    State(state): State<Arc<Skillshare>>,
    Path(id): Path<UserId>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match followers(state.storage.as_ref(), &id, &page.clamped()).await {
        Ok(page) => (StatusCode::OK, Json(page.map(|u| UserView::from(&u)))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

async fn following_handler(
    State(state): State<Arc<Skillshare>>,
    Path(id): Path<UserId>,
    Query(page): Query<PageRequest>,
) -> axum::response::Response {
    match following(state.storage.as_ref(), &id, &page.clamped()).await {
        Ok(page) => (StatusCode::OK, Json(page.map(|u| UserView::from(&u)))).into_response(),
        Err(err) => {
            info!("{}", err);
            err.into_response()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Public API                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Return a router for the User API
///
/// The returned [Router] will presumably be merged with other routers.
pub fn make_router(state: Arc<Skillshare>) -> Router<Arc<Skillshare>> {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/validate", get(validate_handler))
        .route(
            "/users/{id}",
            get(get_user_handler)
                .put(update_profile_handler)
                .delete(delete_user_handler),
        )
        .route("/users/email/{email}", get(user_by_email_handler))
        .route("/users/{id}/password", put(update_password_handler))
        .route("/users/{id}/follow", post(follow_handler))
        .route("/users/{id}/followers", get(followers_handler))
        .route("/users/{id}/following", get(following_handler))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            authenticate,
        ))
        // All responses are JSON; add the appropriate Content-Type header (but leave the existing
        // Content-Type header should a handler set it specially).
        .layer(SetResponseHeaderLayer::if_not_present(
            CONTENT_TYPE,
            HeaderValue::from_static("text/json; charset=utf-8"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod user_tests {
    use super::*;

    use crate::{
        memory,
        peppers::{Pepper, Version},
        signing_keys::{KeyId, SigningKey},
        util::random_key,
    };

    fn peppers() -> Peppers {
        Peppers::from([(
            Version::new("pepper-ver:20250601").unwrap(),
            Pepper::new(random_key(32)).unwrap(),
        )])
    }

    fn signing_keys() -> SigningKeys {
        SigningKeys::from([(
            KeyId::new("keyid:20250601").unwrap(),
            SigningKey::new(vec![42u8; 64]).unwrap(),
        )])
    }

    async fn mk(storage: &memory::Client, peppers: &Peppers, name: &str) -> User {
        let pw = SecretString::from("f00bar!");
        register(
            storage,
            peppers,
            &DisplayName::new(name).unwrap(),
            &UserEmail::new(&format!("{}@example.com", name.to_lowercase())).unwrap(),
            &pw,
            &pw,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn register_login_validate() {
        let storage = memory::Client::new();
        let peppers = peppers();
        let keys = signing_keys();
        let user = mk(&storage, &peppers, "Alice").await;
        let email = UserEmail::new("alice@example.com").unwrap();

        let (token, logged_in) = login(
            &storage,
            &peppers,
            &keys,
            "skillshare.example.com",
            &Duration::minutes(5),
            &email,
            SecretString::from("f00bar!"),
        )
        .await
        .unwrap();
        assert_eq!(user.id(), logged_in.id());

        let validated = validate(&storage, &keys, "skillshare.example.com", &token)
            .await
            .unwrap();
        assert_eq!(user.id(), validated.id());

        let err = login(
            &storage,
            &peppers,
            &keys,
            "skillshare.example.com",
            &Duration::minutes(5),
            &email,
            SecretString::from("wrong-password"),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Unauthorized, err.kind());

        // Same answer for someone who doesn't exist
        let err = login(
            &storage,
            &peppers,
            &keys,
            "skillshare.example.com",
            &Duration::minutes(5),
            &UserEmail::new("mallory@example.com").unwrap(),
            SecretString::from("f00bar!"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::IncorrectCredentials { .. }));

        let err = validate(&storage, &keys, "skillshare.example.com", "not.a.token")
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Unauthorized, err.kind());
    }

    #[tokio::test]
    async fn registration_failures() {
        let storage = memory::Client::new();
        let peppers = peppers();
        mk(&storage, &peppers, "Alice").await;

        let err = register(
            &storage,
            &peppers,
            &DisplayName::new("Alice Again").unwrap(),
            &UserEmail::new("alice@example.com").unwrap(),
            &SecretString::from("f00bar!"),
            &SecretString::from("f00bar!"),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Conflict, err.kind());

        let err = register(
            &storage,
            &peppers,
            &DisplayName::new("Bob").unwrap(),
            &UserEmail::new("bob@example.com").unwrap(),
            &SecretString::from("f00bar!"),
            &SecretString::from("f00baz!"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::PasswordMismatch { .. }));
        assert_eq!(ErrorKind::InvalidOperation, err.kind());

        let err = register(
            &storage,
            &peppers,
            &DisplayName::new("Bob").unwrap(),
            &UserEmail::new("bob@example.com").unwrap(),
            &SecretString::from("f00"),
            &SecretString::from("f00"),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
    }

    #[tokio::test]
    async fn profiles_and_passwords() {
        let storage = memory::Client::new();
        let peppers = peppers();
        let alice = mk(&storage, &peppers, "Alice").await;
        let bob = mk(&storage, &peppers, "Bob").await;

        let updated = update_profile(
            &storage,
            &alice.id(),
            &alice.id(),
            ProfileUpdate {
                bio: Some("Learning the cello".to_owned()),
                location: Some("Oakland".to_owned()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(Some("Learning the cello"), updated.bio());
        assert_eq!(Some("Oakland"), updated.location());
        assert_eq!("Alice", updated.name().as_ref());

        let err = update_profile(&storage, &bob.id(), &alice.id(), ProfileUpdate::default())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::Forbidden, err.kind());

        let err = update_profile(
            &storage,
            &alice.id(),
            &alice.id(),
            ProfileUpdate {
                bio: Some("x".repeat(MAX_BIO_LENGTH + 1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::BioTooLong { .. }));

        let err = update_password(
            &storage,
            &peppers,
            &alice.id(),
            &alice.id(),
            SecretString::from("not-it"),
            &SecretString::from("n3w-password"),
        )
        .await
        .unwrap_err();
        assert_eq!(ErrorKind::Unauthorized, err.kind());

        let changed = update_password(
            &storage,
            &peppers,
            &alice.id(),
            &alice.id(),
            SecretString::from("f00bar!"),
            &SecretString::from("n3w-password"),
        )
        .await
        .unwrap();
        assert!(changed
            .check_password(&peppers, SecretString::from("n3w-password"))
            .is_ok());
        assert!(changed
            .check_password(&peppers, SecretString::from("f00bar!"))
            .is_err());

        let found = user_by_email(&storage, &UserEmail::new("bob@example.com").unwrap())
            .await
            .unwrap();
        assert_eq!(bob.id(), found.id());
        let err = user_by_email(&storage, &UserEmail::new("carol@example.com").unwrap())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn follow_listings() {
        let storage = memory::Client::new();
        let peppers = peppers();
        let alice = mk(&storage, &peppers, "Alice").await;
        let bob = mk(&storage, &peppers, "Bob").await;
        let carol = mk(&storage, &peppers, "Carol").await;

        relationships::toggle_follow(&storage, &bob.id(), &alice.id())
            .await
            .unwrap();
        relationships::toggle_follow(&storage, &carol.id(), &alice.id())
            .await
            .unwrap();

        let page = followers(&storage, &alice.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(2, page.total);
        assert_eq!(
            vec![bob.id(), carol.id()],
            page.items.iter().map(|u| u.id()).collect::<Vec<_>>()
        );

        let page = following(&storage, &bob.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(vec![alice.id()], page.items.iter().map(|u| u.id()).collect::<Vec<_>>());

        let view = UserView::from(&storage::fetch::<User>(&storage, &alice.id()).await.unwrap());
        assert_eq!(2, view.followers.len());
        assert!(!serde_json::to_string(&view).unwrap().contains("password"));
    }
}
