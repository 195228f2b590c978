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

//! Integration tests for the user API.
//!
//! Backend-agnostic test logic for registration, login & follows goes here.

use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use skillshare::{
    http::ErrorResponseBody,
    storage::Page,
    users::{FollowRsp, UserView},
};

use crate::signup;

/// Register, fail to register twice, login & check the resulting token
pub async fn test_register_and_login(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let (user, token) = signup(&client, &url, "John Doe").await?;
    assert_eq!("John Doe", user.name);
    assert!(user.followers.is_empty());

    let rsp = client
        .post(url.join("/api/v1/auth/register")?)
        .json(&json!({
            "name": "Jane Doe",
            "email": user.email,
            "password": "s3cr3t",
            "confirmPassword": "s3cr3t"
        }))
        .send()
        .await?;
    assert_eq!(StatusCode::CONFLICT, rsp.status());
    let body = rsp.json::<ErrorResponseBody>().await?;
    assert!(body.error.contains(&user.email));

    let rsp = client
        .post(url.join("/api/v1/auth/register")?)
        .json(&json!({
            "name": "Jane Doe",
            "email": "jane@example.com",
            "password": "s3cr3t",
            "confirmPassword": "secret"
        }))
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let rsp = client
        .post(url.join("/api/v1/auth/login")?)
        .json(&json!({"email": user.email, "password": "wrong"}))
        .send()
        .await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    let rsp = client
        .get(url.join("/api/v1/auth/validate")?)
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    assert_eq!(user.id, rsp.json::<UserView>().await?.id);

    let rsp = client.get(url.join("/api/v1/auth/validate")?).send().await?;
    assert_eq!(StatusCode::UNAUTHORIZED, rsp.status());

    Ok(())
}

/// Follow, check both sides of the relationship, then unfollow
pub async fn test_follow_toggles(url: Url) -> Result<(), Failed> {
    let client = Client::new();

    let (alice, token) = signup(&client, &url, "Alice").await?;
    let (bob, _) = signup(&client, &url, "Bob").await?;

    let rsp = client
        .post(url.join(&format!("/api/v1/users/{}/follow", bob.id))?)
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let body = rsp.json::<FollowRsp>().await?;
    assert!(body.following);
    assert_eq!(vec![bob.id], body.user.following);

    let followers = client
        .get(url.join(&format!("/api/v1/users/{}/followers", bob.id))?)
        .send()
        .await?
        .json::<Page<UserView>>()
        .await?;
    assert_eq!(1, followers.total);
    assert_eq!(alice.id, followers.items[0].id);

    // Following oneself is refused
    let rsp = client
        .post(url.join(&format!("/api/v1/users/{}/follow", alice.id))?)
        .bearer_auth(&token)
        .send()
        .await?;
    assert_eq!(StatusCode::BAD_REQUEST, rsp.status());

    let body = client
        .post(url.join(&format!("/api/v1/users/{}/follow", bob.id))?)
        .bearer_auth(&token)
        .send()
        .await?
        .json::<FollowRsp>()
        .await?;
    assert!(!body.following);
    assert!(body.user.following.is_empty());

    Ok(())
}
