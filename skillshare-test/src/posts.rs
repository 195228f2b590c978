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

//! Integration tests for posts: the feed, likes, comments & commitments.

use chrono::{Duration, Utc};
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::{json, Value};
use skillshare::{comments::CommentView, posts::PostView, storage::Page};

use crate::signup;

async fn create_post(
    client: &Client,
    url: &Url,
    token: &str,
    body: Value,
) -> Result<PostView, Failed> {
    let rsp = client
        .post(url.join("/api/v1/posts")?)
        .bearer_auth(token)
        .json(&body)
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    Ok(rsp.json::<PostView>().await?)
}

/// The feed shows posts by the caller & by those they follow; nobody else's
pub async fn test_feed(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let (_, alice) = signup(&client, &url, "Alice").await?;
    let (bob_view, bob) = signup(&client, &url, "Bob").await?;
    let (_, carol) = signup(&client, &url, "Carol").await?;

    let rsp = client
        .post(url.join(&format!("/api/v1/users/{}/follow", bob_view.id))?)
        .bearer_auth(&alice)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());

    let from_bob = create_post(
        &client,
        &url,
        &bob,
        json!({"title": "Wheel throwing", "content": "Centering is everything"}),
    )
    .await?;
    let from_carol = create_post(
        &client,
        &url,
        &carol,
        json!({"title": "Sourdough", "content": "Day three of the starter"}),
    )
    .await?;
    let from_alice = create_post(
        &client,
        &url,
        &alice,
        json!({"title": "Knots", "content": "Bowline, then the clove hitch"}),
    )
    .await?;

    let feed = client
        .get(url.join("/api/v1/posts/feed")?)
        .bearer_auth(&alice)
        .send()
        .await?
        .json::<Page<PostView>>()
        .await?;
    assert_eq!(2, feed.total);
    // Newest first
    assert_eq!(from_alice.id, feed.items[0].id);
    assert_eq!(from_bob.id, feed.items[1].id);
    assert!(feed.items.iter().all(|p| p.id != from_carol.id));

    let rsp = client.get(url.join("/api/v1/posts/feed")?).send().await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    Ok(())
}

/// Like & unlike; comment; delete the post & take its comments along
pub async fn test_likes_and_comments(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let (_, author) = signup(&client, &url, "Dana").await?;
    let (_, reader) = signup(&client, &url, "Eli").await?;

    let post = create_post(
        &client,
        &url,
        &author,
        json!({"title": "Watercolor washes", "content": "Wet on wet"}),
    )
    .await?;

    let liked = client
        .post(url.join(&format!("/api/v1/posts/{}/like", post.id))?)
        .bearer_auth(&reader)
        .send()
        .await?
        .json::<PostView>()
        .await?;
    assert_eq!(1, liked.like_count);
    assert!(liked.liked);

    let rsp = client
        .post(url.join(&format!("/api/v1/posts/{}/comments", post.id))?)
        .bearer_auth(&reader)
        .json(&json!({"content": "Lovely gradient!"}))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());
    let comment = rsp.json::<CommentView>().await?;

    let comments = client
        .get(url.join(&format!("/api/v1/posts/{}/comments", post.id))?)
        .send()
        .await?
        .json::<Page<CommentView>>()
        .await?;
    assert_eq!(1, comments.total);
    assert_eq!("Lovely gradient!", comments.items[0].content);

    // Only the author may delete
    let rsp = client
        .delete(url.join(&format!("/api/v1/posts/{}", post.id))?)
        .bearer_auth(&reader)
        .send()
        .await?;
    assert_eq!(StatusCode::FORBIDDEN, rsp.status());

    let rsp = client
        .delete(url.join(&format!("/api/v1/posts/{}", post.id))?)
        .bearer_auth(&author)
        .send()
        .await?;
    assert_eq!(StatusCode::NO_CONTENT, rsp.status());

    let rsp = client
        .get(url.join(&format!("/api/v1/comments/{}", comment.id))?)
        .send()
        .await?;
    assert_eq!(StatusCode::NOT_FOUND, rsp.status());

    Ok(())
}

/// Commit until the goal is met, withdraw & watch the post fall short again
pub async fn test_commitments(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let (_, host) = signup(&client, &url, "Frankie").await?;
    let (_, joiner) = signup(&client, &url, "Gale").await?;

    let deadline = Utc::now() + Duration::days(30);
    let post = create_post(
        &client,
        &url,
        &host,
        json!({
            "title": "30 days of sketching",
            "content": "One sketch a day; who's in?",
            "commitment_goal": 1,
            "commitment_deadline": deadline.to_rfc3339(),
        }),
    )
    .await?;
    assert!(!post.commitment_complete);

    let open = client
        .get(url.join("/api/v1/posts/open-commitments")?)
        .send()
        .await?
        .json::<Page<PostView>>()
        .await?;
    assert!(open.items.iter().any(|p| p.id == post.id));

    let committed = client
        .post(url.join(&format!("/api/v1/posts/{}/commit", post.id))?)
        .bearer_auth(&joiner)
        .send()
        .await?
        .json::<PostView>()
        .await?;
    assert!(committed.committed);
    assert!(committed.commitment_complete);

    // Committing twice is an error
    let rsp = client
        .post(url.join(&format!("/api/v1/posts/{}/commit", post.id))?)
        .bearer_auth(&joiner)
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let mine = client
        .get(url.join("/api/v1/posts/committed")?)
        .bearer_auth(&joiner)
        .send()
        .await?
        .json::<Page<PostView>>()
        .await?;
    assert_eq!(1, mine.total);
    assert_eq!(post.id, mine.items[0].id);

    let withdrawn = client
        .post(url.join(&format!("/api/v1/posts/{}/withdraw-commitment", post.id))?)
        .bearer_auth(&joiner)
        .send()
        .await?
        .json::<PostView>()
        .await?;
    assert!(!withdrawn.committed);
    assert!(!withdrawn.commitment_complete);

    Ok(())
}
