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

//! # smoke-memory
//!
//! Integration tests run against a skillshare instance backed by the in-memory store. Unless the
//! test configuration names a running instance, one is served from within this process on an
//! ephemeral port.

use std::{fmt::Display, io, net::SocketAddr, sync::Arc};

use chrono::Duration;
use common::{Configuration, SkillshareTest};
use itertools::Itertools;
use libtest_mimic::{Arguments, Trial};
use opentelemetry_prometheus_text_exporter::PrometheusExporter;
use reqwest::Url;
use skillshare::{
    memory, peppers::Peppers, signing_keys::SigningKeys, skillshare::make_world_router,
    skillshare::Skillshare,
};
use skillshare_test::{
    posts::{test_commitments, test_feed, test_likes_and_comments},
    test_healthcheck,
    users::{test_follow_toggles, test_register_and_login},
};
use snafu::{prelude::*, Backtrace};
use tokio::{net::TcpListener, runtime::Runtime};
use tracing::error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

mod common;

#[derive(Snafu)]
enum Error {
    #[snafu(display("Failed to bind a listener: {source}"))]
    Bind {
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Error obtaining test configuration: {source}"))]
    Configuration { source: common::Error },
    #[snafu(display("Failed to parse RUST_LOG: {source}"))]
    Filter {
        source: tracing_subscriber::filter::FromEnvError,
    },
    #[snafu(display("Unknown log level {text}"))]
    Level { text: String },
    #[snafu(display("Failed to obtain the listener's address: {source}"))]
    LocalAddr { source: std::io::Error },
    #[snafu(display("Failed to build a tokio runtime: {source}"))]
    Runtime { source: std::io::Error },
    #[snafu(display("Failed to set the global tracing subscriber: {source}"))]
    SetGlobalDefault {
        source: tracing::subscriber::SetGlobalDefaultError,
    },
    #[snafu(display("Failed to form the instance's URL: {source}"))]
    Url { source: url::ParseError },
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self, f)
    }
}

type Result<T> = std::result::Result<T, Error>;

/// Serve skillshare over the in-memory store on an ephemeral local port; return its URL
async fn serve_in_process() -> Result<Url> {
    let listener = TcpListener::bind("127.0.0.1:0".parse::<SocketAddr>().unwrap(/* known good */))
        .await
        .context(BindSnafu)?;
    let addr = listener.local_addr().context(LocalAddrSnafu)?;
    let origin = format!("http://{}", addr);
    let state = Arc::new(Skillshare::new(
        &origin,
        Arc::new(memory::Client::new()),
        PrometheusExporter::new(),
        Peppers::default(),
        Duration::hours(1),
        SigningKeys::default(),
    ));
    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, make_world_router(state)).await {
            error!("skillshare exited: {:?}", err);
        }
    });
    Url::parse(&origin).context(UrlSnafu)
}

inventory::submit!(SkillshareTest {
    name: "000test_healthcheck",
    test_fn: |url| Box::pin(test_healthcheck(url)),
});

inventory::submit!(SkillshareTest {
    name: "010register_and_login",
    test_fn: |url| Box::pin(test_register_and_login(url)),
});

inventory::submit!(SkillshareTest {
    name: "011follow_toggles",
    test_fn: |url| Box::pin(test_follow_toggles(url)),
});

inventory::submit!(SkillshareTest {
    name: "020feed",
    test_fn: |url| Box::pin(test_feed(url)),
});

inventory::submit!(SkillshareTest {
    name: "021likes_and_comments",
    test_fn: |url| Box::pin(test_likes_and_comments(url)),
});

inventory::submit!(SkillshareTest {
    name: "022commitments",
    test_fn: |url| Box::pin(test_commitments(url)),
});

fn main() -> Result<()> {
    // libtest-mimic wants synchronous tests; keep a handle on our own runtime so that each test
    // (and the server, if we're running one) is driven by it
    let rt = Arc::new(Runtime::new().context(RuntimeSnafu)?);

    // There's no way to add command-line arguments, so configuration comes via the environment
    let config = Configuration::new().context(ConfigurationSnafu)?;

    let mut args = Arguments::from_args();

    if config.logging {
        let level = config
            .log_level
            .parse::<tracing::Level>()
            .ok()
            .context(LevelSnafu {
                text: config.log_level.clone(),
            })?;
        let filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env()
            .context(FilterSnafu)?;
        tracing::subscriber::set_global_default(
            Registry::default()
                .with(fmt::Layer::default().compact().with_writer(io::stdout))
                .with(filter),
        )
        .context(SetGlobalDefaultSnafu)?;
    }

    let url = match config.url.clone() {
        Some(url) => url,
        None => rt.block_on(serve_in_process())?,
    };

    // The tests assume they run one at a time, in the order given by their names
    if !matches!(args.test_threads, Some(1)) {
        eprintln!("Temporarily overriding --test-threads to 1.");
        args.test_threads = Some(1);
    }

    let conclusion = libtest_mimic::run(
        &args,
        inventory::iter::<SkillshareTest>
            .into_iter()
            .sorted_by_key(|t| t.name)
            .map(|test| {
                Trial::test(test.name, {
                    let rt = rt.clone();
                    let url = url.clone();
                    move || rt.block_on((test.test_fn)(url))
                })
            })
            .collect(),
    );

    conclusion.exit();
}
