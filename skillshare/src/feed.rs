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

//! # feed
//!
//! Assemble a user's feed: posts by the people they follow, and by themselves, newest first.

use snafu::prelude::*;
use tracing::debug;

use crate::{
    entities::{Post, User, UserId},
    http::ErrorKind,
    storage::{self, Backend as StorageBackend, Page, PageRequest, Predicate, Sort},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to assemble a feed: {source}"))]
    Storage { source: storage::Error },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Storage { source } => source.kind(),
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Retrieve one page of `user`'s feed
///
/// The feed is every post whose author is someone `user` follows, or `user` themselves, ordered by
/// creation time, most recent first. `total` on the returned page counts the entire feed.
pub async fn get_feed(
    storage: &(dyn StorageBackend + Send + Sync),
    user: &UserId,
    page: &PageRequest,
) -> Result<Page<Post>> {
    let user = storage::fetch::<User>(storage, user)
        .await
        .context(StorageSnafu)?;
    let authors = user
        .following()
        .iter()
        .copied()
        .chain(std::iter::once(user.id()))
        .collect::<Vec<UserId>>();
    debug!("Assembling a feed for {} over {} authors", user.id(), authors.len());
    storage::query::<Post>(
        storage,
        &Predicate::any_of("author", authors),
        &Sort::newest_first(),
        page,
    )
    .await
    .context(StorageSnafu)
}

#[cfg(test)]
mod feed_tests {
    use super::*;

    use chrono::{Duration, Utc};

    use crate::{
        entities::PostContent, memory, relationships::relationship_tests::mk_user,
        relationships::toggle_follow,
    };

    async fn post_at(
        storage: &(dyn StorageBackend + Send + Sync),
        author: &UserId,
        title: &str,
        hours_ago: i64,
    ) -> Post {
        storage::put(
            storage,
            &Post::new_at(
                author,
                PostContent {
                    title: title.to_owned(),
                    content: title.to_owned(),
                    ..Default::default()
                },
                Utc::now() - Duration::hours(hours_ago),
            ),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn feed_composition() {
        let storage = memory::Client::new();
        let u = mk_user(&storage, "Ursula").await;
        let v = mk_user(&storage, "Victor").await;
        let w = mk_user(&storage, "Wendy").await;
        let x = mk_user(&storage, "Xavier").await;
        toggle_follow(&storage, &u.id(), &v.id()).await.unwrap();
        toggle_follow(&storage, &u.id(), &w.id()).await.unwrap();

        let p1 = post_at(&storage, &v.id(), "p1", 4).await;
        let p2 = post_at(&storage, &w.id(), "p2", 3).await;
        let p3 = post_at(&storage, &v.id(), "p3", 2).await;
        let p4 = post_at(&storage, &u.id(), "p4", 1).await;
        // Not followed, so not in the feed
        post_at(&storage, &x.id(), "p5", 0).await;

        let feed = get_feed(&storage, &u.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(
            vec![p4.id(), p3.id(), p2.id(), p1.id()],
            feed.items.iter().map(|p| p.id()).collect::<Vec<_>>()
        );
        assert_eq!(4, feed.total);

        let second = get_feed(&storage, &u.id(), &PageRequest::new(1, 3))
            .await
            .unwrap();
        assert_eq!(vec![p1.id()], second.items.iter().map(|p| p.id()).collect::<Vec<_>>());
        assert_eq!(4, second.total);
    }

    #[tokio::test]
    async fn no_follows_means_own_posts() {
        let storage = memory::Client::new();
        let u = mk_user(&storage, "Ursula").await;
        let v = mk_user(&storage, "Victor").await;
        let mine = post_at(&storage, &u.id(), "mine", 1).await;
        post_at(&storage, &v.id(), "theirs", 0).await;
        let feed = get_feed(&storage, &u.id(), &PageRequest::default())
            .await
            .unwrap();
        assert_eq!(vec![mine.id()], feed.items.iter().map(|p| p.id()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn unknown_user() {
        let storage = memory::Client::new();
        assert_eq!(
            ErrorKind::NotFound,
            get_feed(&storage, &UserId::new(), &PageRequest::default())
                .await
                .unwrap_err()
                .kind()
        );
    }
}
