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

//! # engagement
//!
//! Likes. Anything a user can like implements [Likeable]; [toggle_like] works over all of them.

use snafu::prelude::*;
use tracing::debug;

use crate::{
    entities::{Post, Resource, User, UserId},
    http::ErrorKind,
    storage::{self, Backend as StorageBackend, Record},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{source}"))]
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

/// A stored thing users can like
pub trait Likeable: Record {
    /// Flip `user`'s like; true means the thing is now liked by `user`
    fn toggle_like(&mut self, user: UserId) -> bool;
    fn is_liked_by(&self, user: &UserId) -> bool;
    fn like_count(&self) -> usize;
}

impl Likeable for Post {
    fn toggle_like(&mut self, user: UserId) -> bool {
        Post::toggle_like(self, user)
    }
    fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes().contains(user)
    }
    fn like_count(&self) -> usize {
        self.likes().len()
    }
}

impl Likeable for Resource {
    fn toggle_like(&mut self, user: UserId) -> bool {
        Resource::toggle_like(self, user)
    }
    fn is_liked_by(&self, user: &UserId) -> bool {
        self.likes().contains(user)
    }
    fn like_count(&self) -> usize {
        self.likes().len()
    }
}

/// Like `id` on behalf of `user` if they don't already, unlike it if they do
///
/// Never fails on account of the current state of the like; fails with NotFound if either the
/// thing or the user doesn't exist (checked before anything is written).
pub async fn toggle_like<T: Likeable>(
    storage: &(dyn StorageBackend + Send + Sync),
    id: &T::Id,
    user: &UserId,
) -> Result<T> {
    let mut record = storage::fetch::<T>(storage, id)
        .await
        .context(StorageSnafu)?;
    storage::fetch::<User>(storage, user)
        .await
        .context(StorageSnafu)?;
    let liked = record.toggle_like(*user);
    debug!("{} {} {} {}", user, if liked { "likes" } else { "unlikes" }, T::KIND, id);
    storage::put(storage, &record).await.context(StorageSnafu)
}

#[cfg(test)]
mod engagement_tests {
    use super::*;

    use crate::{
        entities::{PostContent, PostId, ResourceContent, ResourceType},
        memory,
        relationships::relationship_tests::mk_user,
    };

    #[tokio::test]
    async fn likes_flip() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let b = mk_user(&storage, "Bob").await;
        let post = storage::put(
            &storage,
            &Post::new(
                &a.id(),
                PostContent {
                    title: "t".to_owned(),
                    content: "c".to_owned(),
                    ..Default::default()
                },
            ),
        )
        .await
        .unwrap();
        let post = toggle_like::<Post>(&storage, &post.id(), &b.id())
            .await
            .unwrap();
        assert!(post.is_liked_by(&b.id()));
        let post = toggle_like::<Post>(&storage, &post.id(), &b.id())
            .await
            .unwrap();
        assert!(!post.is_liked_by(&b.id()));
        assert_eq!(0, post.like_count());
    }

    #[tokio::test]
    async fn resources_too() {
        let storage = memory::Client::new();
        let a = mk_user(&storage, "Alice").await;
        let resource = storage::put(
            &storage,
            &Resource::new(
                &a.id(),
                ResourceContent {
                    title: "The Book".to_owned(),
                    description: "the Rust book".to_owned(),
                    url: "https://doc.rust-lang.org/book/".to_owned(),
                    resource_type: ResourceType::Book,
                    skill_category: "Rust".to_owned(),
                },
            ),
        )
        .await
        .unwrap();
        let resource = toggle_like::<Resource>(&storage, &resource.id(), &a.id())
            .await
            .unwrap();
        assert_eq!(1, resource.like_count());
        assert_eq!(
            ErrorKind::NotFound,
            toggle_like::<Resource>(&storage, &resource.id(), &UserId::new())
                .await
                .unwrap_err()
                .kind()
        );
        assert_eq!(
            ErrorKind::NotFound,
            toggle_like::<Post>(&storage, &PostId::new(), &a.id())
                .await
                .unwrap_err()
                .kind()
        );
    }
}
