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

//! # The skillshare Integration Tests
//!
//! `cargo test` is built for testing libraries; these tests exercise a running *service*, so each
//! integration test program opts out of the default harness:
//!
//! ```toml
//! [[test]]
//!     name = "smoke-memory"
//!     harness = false
//! ```
//!
//! and supplies its own `main()`, which uses [libtest-mimic] to honor the usual command-line
//! arguments. Each program is a fixture unto itself: it stands up (or finds) a skillshare instance,
//! then runs the tests registered with it.
//!
//! [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
//!
//! Test logic that doesn't care how the service under test was set up lives here (in this library
//! & its modules) so that any test program can register it. The test framework itself (the
//! configuration & the `Test` struct) lives in `tests/common`.
use libtest_mimic::Failed;
use reqwest::{Client, StatusCode, Url};
use serde_json::json;
use skillshare::users::{LoginRsp, UserView};
use uuid::Uuid;

pub mod posts;
pub mod users;

/// Hit the skillshare healthcheck endpoint; fail on anything other than "GOOD"
///
/// Like every test function here, this returns `Result<(), Failed>` ([Failed] comes from
/// [libtest-mimic]) so that fallible plumbing I'm not interested in testing can just use `?`.
///
/// [libtest-mimic]: https://docs.rs/libtest-mimic/latest/libtest_mimic/index.html
pub async fn test_healthcheck(url: Url) -> Result<(), Failed> {
    assert!(
        "GOOD"
            == reqwest::get(url.join("/healthcheck")?)
                .await?
                .text()
                .await?
    );
    Ok(())
}

/// Register a fresh user named `name` & log them in
///
/// Tests share a server, so the e-mail address is made unique. Returns the new user along with a
/// bearer token.
pub async fn signup(client: &Client, url: &Url, name: &str) -> Result<(UserView, String), Failed> {
    let email = format!(
        "{}-{}@example.com",
        name.to_lowercase().replace(' ', "."),
        Uuid::new_v4().simple()
    );
    let rsp = client
        .post(url.join("/api/v1/auth/register")?)
        .json(&json!({
            "name": name,
            "email": email,
            "password": "f00 b@r sp1at",
            "confirmPassword": "f00 b@r sp1at"
        }))
        .send()
        .await?;
    assert_eq!(StatusCode::CREATED, rsp.status());

    let rsp = client
        .post(url.join("/api/v1/auth/login")?)
        .json(&json!({"email": email, "password": "f00 b@r sp1at"}))
        .send()
        .await?;
    assert_eq!(StatusCode::OK, rsp.status());
    let body = rsp.json::<LoginRsp>().await?;
    Ok((body.user, body.token))
}
