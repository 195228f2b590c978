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

use std::{env, fs, future::Future, pin::Pin};

use libtest_mimic::Failed;
use reqwest::Url;
use serde::Deserialize;
use snafu::{prelude::*, IntoError};
use tap::Pipe;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse {pth}: {source}"))]
    De {
        pth: String,
        source: toml::de::Error,
    },
    #[snafu(display("Failed to read SKILLSHARE_TEST_CONFIG: {source}"))]
    Env { source: std::env::VarError },
    #[snafu(display("Failed to read {pth}: {source}"))]
    Read { pth: String, source: std::io::Error },
}

type Result<T> = std::result::Result<T, Error>;

/// Common test configuration
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Where to find skillshare; if not given, the test program stands up its own instance
    pub url: Option<Url>,
    /// Log to stdout while testing
    pub logging: bool,
    /// One of "trace", "debug", "info", "warn" or "error"
    #[serde(rename = "log-level")]
    pub log_level: String,
}

impl Configuration {
    /// Obtain a [Configuration]
    ///
    /// Check the `SKILLSHARE_TEST_CONFIG` environment variable; if defined, attempt to parse a
    /// [Configuration] from the file named therein; else return a default instance.
    pub fn new() -> Result<Configuration> {
        match env::var("SKILLSHARE_TEST_CONFIG") {
            Ok(f) => fs::read_to_string(&f)
                .context(ReadSnafu { pth: f.clone() })?
                .pipe(|s| toml::from_str::<Configuration>(&s))
                .context(DeSnafu { pth: f.clone() }),
            Err(env::VarError::NotPresent) => Ok(Configuration::default()),
            Err(err) => Err(EnvSnafu.into_error(err)),
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration {
            url: None,
            logging: false,
            log_level: "info".to_owned(),
        }
    }
}

pub type TestFuture = Pin<Box<dyn Future<Output = std::result::Result<(), Failed>> + Send>>;

/// A named, async test run against the skillshare instance at `url`
#[derive(Debug)]
pub struct SkillshareTest {
    pub name: &'static str,
    pub test_fn: fn(url: Url) -> TestFuture,
}

inventory::collect!(SkillshareTest);
