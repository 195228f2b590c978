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

//! # relationships
//!
//! The skillshare social graph.
//!
//! Follow edges are stored redundantly: if A follows B, B's id is in A's `following` set *and*
//! A's id is in B's `followers` set. Every operation in this module keeps the two sides in step.
//! The store gives us atomic writes on a single record but no multi-record transactions, so a
//! follow is two independent (version-checked) writes; if the second fails, the first stands and
//! the failure is reported to the caller. Nothing here attempts to roll back or repair.

use snafu::{prelude::*, Backtrace};
use tracing::{debug, info};

use crate::{
    comments,
    entities::{Comment, LearningPlan, Post, Resource, User, UserId},
    http::ErrorKind,
    storage::{self, Backend as StorageBackend, Predicate},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("User {actor} may not delete the account of user {target}"))]
    NotYourAccount {
        actor: UserId,
        target: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("Users cannot follow themselves"))]
    SelfFollow { id: UserId, backtrace: Backtrace },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
    #[snafu(display("Failed to remove the comments on a post: {source}"))]
    Comments { source: comments::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotYourAccount { .. } => ErrorKind::Forbidden,
            Error::SelfFollow { .. } => ErrorKind::InvalidOperation,
            Error::Storage { source } => source.kind(),
            Error::Comments { source } => source.kind(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Follow `target` if `actor` isn't following them, unfollow them if `actor` is
///
/// Returns `actor`'s record as updated. The target is written first, then the actor.
pub async fn toggle_follow(
    storage: &(dyn StorageBackend + Send + Sync),
    actor: &UserId,
    target: &UserId,
) -> Result<User> {
    ensure!(actor != target, SelfFollowSnafu { id: *actor });

    let mut follower = storage::fetch::<User>(storage, actor)
        .await
        .context(StorageSnafu)?;
    let mut followee = storage::fetch::<User>(storage, target)
        .await
        .context(StorageSnafu)?;

    if follower.is_following(target) {
        follower.remove_following(target);
        followee.remove_follower(actor);
        debug!("{} unfollows {}", actor, target);
    } else {
        follower.add_following(*target);
        followee.add_follower(*actor);
        debug!("{} follows {}", actor, target);
    }

    storage::put(storage, &followee)
        .await
        .context(StorageSnafu)?;
    storage::put(storage, &follower).await.context(StorageSnafu)
}

/// Delete `target`'s account, along with everything they own & every reference to them
///
/// Only the account holder may do this. Every other user's follow sets, every post's likes &
/// commits, and every resource's likes are scrubbed of `target`; then their posts (with the
/// comments on them), resources, comments & learning plans are deleted, and finally their user
/// record. Each step is its own write; a failure part way through leaves the earlier steps in
/// place.
pub async fn delete_user(
    storage: &(dyn StorageBackend + Send + Sync),
    actor: &UserId,
    target: &UserId,
) -> Result<()> {
    ensure!(
        actor == target,
        NotYourAccountSnafu {
            actor: *actor,
            target: *target,
        }
    );
    // Fail early (with NotFound) if there's no such user
    storage::fetch::<User>(storage, target)
        .await
        .context(StorageSnafu)?;

    // Scrub the social graph...
    let related = storage::query_all::<User>(
        storage,
        &Predicate::Or(vec![
            Predicate::contains("followers", target),
            Predicate::contains("following", target),
        ]),
    )
    .await
    .context(StorageSnafu)?;
    for mut user in related.into_iter().filter(|u| u.id() != *target) {
        user.remove_follower(target);
        user.remove_following(target);
        storage::put(storage, &user).await.context(StorageSnafu)?;
    }

    // engagement on other people's posts...
    let engaged = storage::query_all::<Post>(
        storage,
        &Predicate::Or(vec![
            Predicate::contains("likes", target),
            Predicate::contains("commits", target),
        ]),
    )
    .await
    .context(StorageSnafu)?;
    for mut post in engaged.into_iter().filter(|p| p.author() != *target) {
        post.remove_like(target);
        post.remove_commit(target);
        storage::put(storage, &post).await.context(StorageSnafu)?;
    }

    // & resources...
    let liked = storage::query_all::<Resource>(storage, &Predicate::contains("likes", target))
        .await
        .context(StorageSnafu)?;
    for mut resource in liked.into_iter().filter(|r| !r.is_owner(target)) {
        resource.remove_like(target);
        storage::put(storage, &resource)
            .await
            .context(StorageSnafu)?;
    }

    // then delete everything they own.
    let posts = storage::query_all::<Post>(storage, &Predicate::eq("author", target))
        .await
        .context(StorageSnafu)?;
    for post in &posts {
        comments::delete_comments_for_post(storage, &post.id())
            .await
            .context(CommentsSnafu)?;
        storage::delete::<Post>(storage, &post.id())
            .await
            .context(StorageSnafu)?;
    }
    let resources = storage::query_all::<Resource>(storage, &Predicate::eq("owner", target))
        .await
        .context(StorageSnafu)?;
    for resource in &resources {
        storage::delete::<Resource>(storage, &resource.id())
            .await
            .context(StorageSnafu)?;
    }
    let comments = storage::query_all::<Comment>(storage, &Predicate::eq("author", target))
        .await
        .context(StorageSnafu)?;
    for comment in &comments {
        storage::delete::<Comment>(storage, &comment.id())
            .await
            .context(StorageSnafu)?;
    }
    let plans = storage::query_all::<LearningPlan>(storage, &Predicate::eq("owner", target))
        .await
        .context(StorageSnafu)?;
    for plan in &plans {
        storage::delete::<LearningPlan>(storage, &plan.id())
            .await
            .context(StorageSnafu)?;
    }

    storage::delete::<User>(storage, target)
        .await
        .context(StorageSnafu)?;
    info!(
        "Deleted user {}: {} posts, {} resources, {} comments, {} plans",
        target,
        posts.len(),
        resources.len(),
        comments.len(),
        plans.len()
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod relationship_tests {
    use super::*;

    use secrecy::SecretString;

    use crate::{
        entities::{DisplayName, PostContent, UserEmail},
        memory,
        peppers::Peppers,
    };

    /// Create & store a user; shared with the other modules' tests
    pub(crate) async fn mk_user(storage: &(dyn StorageBackend + Send + Sync), name: &str) -> User {
        let (ver, pepper) = Peppers::default().current_pepper().unwrap();
        let user = User::new(
            &ver,
            &pepper,
            &UserEmail::new(&format!("{}@example.com", name.to_lowercase())).unwrap(),
            &DisplayName::new(name).unwrap(),
            &SecretString::from("f00bar"),
        )
        .unwrap();
        storage::put(storage, &user).await.unwrap()
    }

    async fn reload(storage: &(dyn StorageBackend + Send + Sync), id: &UserId) -> User {
        storage::fetch::<User>(storage, id).await.unwrap()
    }

    #[tokio::test]
    async fn follow_is_symmetric() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let b = mk_user(&storage, "Bob").await;
        let c = mk_user(&storage, "Carol").await;

        for (x, y) in [(&a, &b), (&a, &c), (&b, &a), (&a, &b), (&c, &a)] {
            toggle_follow(&storage, &x.id(), &y.id()).await.unwrap();
        }

        let users = [
            reload(&storage, &a.id()).await,
            reload(&storage, &b.id()).await,
            reload(&storage, &c.id()).await,
        ];
        for x in &users {
            for y in &users {
                assert_eq!(
                    x.following().contains(&y.id()),
                    y.followers().contains(&x.id())
                );
            }
        }
        assert!(!users[0].is_following(&b.id()));
        assert!(users[0].is_following(&c.id()));
    }

    #[tokio::test]
    async fn self_follow_rejected() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let err = toggle_follow(&storage, &a.id(), &a.id()).await.unwrap_err();
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
        assert!(reload(&storage, &a.id()).await.following().is_empty());
    }

    #[tokio::test]
    async fn double_toggle_restores() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let b = mk_user(&storage, "Bob").await;
        let after_one = toggle_follow(&storage, &a.id(), &b.id()).await.unwrap();
        assert!(after_one.is_following(&b.id()));
        let after_two = toggle_follow(&storage, &a.id(), &b.id()).await.unwrap();
        assert_eq!(a.following(), after_two.following());
        assert!(reload(&storage, &b.id()).await.followers().is_empty());
    }

    #[tokio::test]
    async fn missing_user() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let err = toggle_follow(&storage, &a.id(), &UserId::new())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
        let err = toggle_follow(&storage, &UserId::new(), &a.id())
            .await
            .unwrap_err();
        assert_eq!(ErrorKind::NotFound, err.kind());
    }

    #[tokio::test]
    async fn stale_writes_conflict() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        // `a` is now at version one; write it once more behind our back
        let mut current = reload(&storage, &a.id()).await;
        current.add_follower(UserId::new());
        storage::put(&storage, &current).await.unwrap();
        let err = storage::put(&storage, &a).await.unwrap_err();
        assert_eq!(ErrorKind::Conflict, err.kind());
    }

    #[tokio::test]
    async fn deletion_cascades() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let b = mk_user(&storage, "Bob").await;
        toggle_follow(&storage, &a.id(), &b.id()).await.unwrap();
        toggle_follow(&storage, &b.id(), &a.id()).await.unwrap();

        let mut bobs = Post::new(
            &b.id(),
            PostContent {
                title: "Bob's post".to_owned(),
                content: "hi".to_owned(),
                commitment_goal: 1,
                ..Default::default()
            },
        );
        bobs.toggle_like(a.id());
        bobs.add_commit(a.id());
        let bobs = storage::put(&storage, &bobs).await.unwrap();
        assert!(bobs.commitment_complete());
        let alices = storage::put(
            &storage,
            &Post::new(
                &a.id(),
                PostContent {
                    title: "Alice's post".to_owned(),
                    content: "hello".to_owned(),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
        let comment = storage::put(&storage, &Comment::new(&alices.id(), &b.id(), "nice"))
            .await
            .unwrap();

        assert_eq!(
            ErrorKind::Forbidden,
            delete_user(&storage, &b.id(), &a.id())
                .await
                .unwrap_err()
                .kind()
        );
        delete_user(&storage, &a.id(), &a.id()).await.unwrap();

        assert!(storage::get::<User>(&storage, &a.id())
            .await
            .unwrap()
            .is_none());
        let b = reload(&storage, &b.id()).await;
        assert!(b.followers().is_empty() && b.following().is_empty());
        let bobs = storage::fetch::<Post>(&storage, &bobs.id()).await.unwrap();
        assert!(bobs.likes().is_empty() && bobs.commits().is_empty());
        assert!(!bobs.commitment_complete());
        assert!(storage::get::<Post>(&storage, &alices.id())
            .await
            .unwrap()
            .is_none());
        assert!(storage::get::<Comment>(&storage, &comment.id())
            .await
            .unwrap()
            .is_none());
    }
}
