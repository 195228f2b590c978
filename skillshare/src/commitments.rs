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

//! # commitments
//!
//! The post commitment workflow.
//!
//! A post may ask for commitments: some number of users (its goal) promising to take part in
//! whatever the post proposes. Users commit & withdraw freely; the post is complete exactly when
//! the number of committed users meets or exceeds the goal. Deadlines are informational; nothing
//! here refuses a commitment because the deadline has passed.

use chrono::Utc;
use snafu::{prelude::*, Backtrace};
use tracing::debug;

use crate::{
    entities::{Post, PostId, User, UserId},
    http::ErrorKind,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate, Sort},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("User {user} has already committed to post {post}"))]
    AlreadyCommitted {
        post: PostId,
        user: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("User {user} has not committed to post {post}"))]
    NotCommitted {
        post: PostId,
        user: UserId,
        backtrace: Backtrace,
    },
    #[snafu(display("{source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AlreadyCommitted { .. } | Error::NotCommitted { .. } => {
                ErrorKind::InvalidOperation
            }
            Error::Storage { source } => source.kind(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Commit `user` to `post`
pub async fn commit(
    storage: &(dyn StorageBackend + Send + Sync),
    post: &PostId,
    user: &UserId,
) -> Result<Post> {
    let mut record = storage::fetch::<Post>(storage, post)
        .await
        .context(StorageSnafu)?;
    storage::fetch::<User>(storage, user)
        .await
        .context(StorageSnafu)?;
    ensure!(
        record.add_commit(*user),
        AlreadyCommittedSnafu {
            post: *post,
            user: *user,
        }
    );
    debug!(
        "{} commits to {}; {}/{}",
        user,
        post,
        record.commits().len(),
        record.commitment_goal()
    );
    storage::put(storage, &record).await.context(StorageSnafu)
}

/// Withdraw `user`'s commitment to `post`
pub async fn withdraw(
    storage: &(dyn StorageBackend + Send + Sync),
    post: &PostId,
    user: &UserId,
) -> Result<Post> {
    let mut record = storage::fetch::<Post>(storage, post)
        .await
        .context(StorageSnafu)?;
    ensure!(
        record.remove_commit(user),
        NotCommittedSnafu {
            post: *post,
            user: *user,
        }
    );
    storage::put(storage, &record).await.context(StorageSnafu)
}

/// Posts to which `user` has committed, newest first
pub async fn committed_posts(
    storage: &(dyn StorageBackend + Send + Sync),
    user: &UserId,
    page: &PageRequest,
) -> Result<Page<Post>> {
    storage::query::<Post>(
        storage,
        &Predicate::contains("commits", user),
        &Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

/// Incomplete commitments whose deadline is yet to come, soonest deadline first
pub async fn active_commitments(
    storage: &(dyn StorageBackend + Send + Sync),
    page: &PageRequest,
) -> Result<Page<Post>> {
    storage::query::<Post>(
        storage,
        &Predicate::And(vec![
            Predicate::eq("commitment_complete", false),
            Predicate::after("commitment_deadline", Utc::now()),
        ]),
        &Sort::ascending("commitment_deadline"),
        page,
    )
    .await
    .context(StorageSnafu)
}

/// Posts still looking for commitments: a non-zero goal not yet met, deadline yet to come, newest
/// first
pub async fn open_commitments(
    storage: &(dyn StorageBackend + Send + Sync),
    page: &PageRequest,
) -> Result<Page<Post>> {
    storage::query::<Post>(
        storage,
        &Predicate::And(vec![
            Predicate::Gt("commitment_goal", 0),
            Predicate::eq("commitment_complete", false),
            Predicate::after("commitment_deadline", Utc::now()),
        ]),
        &Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

#[cfg(test)]
mod commitment_tests {
    use super::*;

    use chrono::Duration;

    use crate::{entities::PostContent, memory, relationships::relationship_tests::mk_user};

    async fn mk_post(
        storage: &(dyn StorageBackend + Send + Sync),
        author: &UserId,
        goal: u32,
        deadline_hours: Option<i64>,
    ) -> Post {
        storage::put(
            storage,
            &Post::new(
                author,
                PostContent {
                    title: "Study group".to_owned(),
                    content: "Who's in?".to_owned(),
                    commitment_goal: goal,
                    commitment_deadline: deadline_hours.map(|h| Utc::now() + Duration::hours(h)),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn threshold() {
        let storage = memory::Client::new();
        let author = mk_user(&storage, "Author").await;
        let users = [
            mk_user(&storage, "Ann").await,
            mk_user(&storage, "Ben").await,
            mk_user(&storage, "Cat").await,
        ];
        let post = mk_post(&storage, &author.id(), 3, Some(24)).await;
        for (i, u) in users.iter().enumerate() {
            let post = commit(&storage, &post.id(), &u.id()).await.unwrap();
            assert_eq!(i == 2, post.commitment_complete());
        }
        let post = withdraw(&storage, &post.id(), &users[0].id())
            .await
            .unwrap();
        assert!(!post.commitment_complete());
        assert_eq!(2, post.commits().len());
    }

    #[tokio::test]
    async fn duplicate_commit() {
        let storage = memory::Client::new();
        let author = mk_user(&storage, "Author").await;
        let ann = mk_user(&storage, "Ann").await;
        let post = mk_post(&storage, &author.id(), 2, None).await;
        let before = commit(&storage, &post.id(), &ann.id()).await.unwrap();
        let err = commit(&storage, &post.id(), &ann.id()).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyCommitted { .. }));
        assert_eq!(ErrorKind::InvalidOperation, err.kind());
        let after = storage::fetch::<Post>(&storage, &post.id()).await.unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn withdraw_without_commit() {
        let storage = memory::Client::new();
        let author = mk_user(&storage, "Author").await;
        let post = mk_post(&storage, &author.id(), 1, None).await;
        assert!(matches!(
            withdraw(&storage, &post.id(), &author.id()).await,
            Err(Error::NotCommitted { .. })
        ));
        assert_eq!(
            ErrorKind::NotFound,
            commit(&storage, &PostId::new(), &author.id())
                .await
                .unwrap_err()
                .kind()
        );
        assert_eq!(
            ErrorKind::NotFound,
            commit(&storage, &post.id(), &UserId::new())
                .await
                .unwrap_err()
                .kind()
        );
    }

    #[tokio::test]
    async fn commitment_queries() {
        let storage = memory::Client::new();
        let author = mk_user(&storage, "Author").await;
        let ann = mk_user(&storage, "Ann").await;
        let later = mk_post(&storage, &author.id(), 2, Some(48)).await;
        let sooner = mk_post(&storage, &author.id(), 2, Some(24)).await;
        let _expired = mk_post(&storage, &author.id(), 2, Some(-24)).await;
        let _no_goal = mk_post(&storage, &author.id(), 0, Some(24)).await;
        let done = mk_post(&storage, &author.id(), 1, Some(24)).await;
        commit(&storage, &done.id(), &ann.id()).await.unwrap();
        commit(&storage, &later.id(), &ann.id()).await.unwrap();

        let active = active_commitments(&storage, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(
            vec![sooner.id(), later.id()],
            active.items.iter().map(|p| p.id()).collect::<Vec<_>>()
        );
        let open = open_commitments(&storage, &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(2, open.total);
        let mine = committed_posts(&storage, &ann.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(2, mine.total);
    }
}
