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

//! # skillshare peppers
//!
//! skillshare salts and [peppers] passwords. Salts are generated at registration time for each user
//! & stored along with that user in the database. Peppers, however, are stored *separately*: they
//! are read from configuration at startup. This module holds peppers in memory as well as
//! versioning & rotating them.
//!
//! [peppers]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#peppering
//!
//! In the configuration file they look like:
//!
//! ```toml
//! [pepper]
//! "pepper-ver:2025-02-12" = [1, 2, 3, 4, ..., 32] # Peppers must be 32 octets in length
//! "pepper-ver:2025-02-15" = [33, 34, 35, ..., 64]
//! ```
//!
//! To rotate, add a new pepper with a later version (versions compare lexicographically) & restart
//! or SIGHUP the daemon. New users get the new pepper; extant users carry the version that was
//! current when they registered, so they can still log in. Remove an old pepper once no user
//! references it.
//!
//! See also module [signing_keys](crate::signing_keys).

use std::{collections::BTreeMap, fmt::Display};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace};

use crate::util::{random_key, Key};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{text} is not a valid pepper version"))]
    BadVersion { text: String, backtrace: Backtrace },
    #[snafu(display("Peppers must be 32 octets in length; got {len}"))]
    BadPepper { len: usize, backtrace: Backtrace },
    #[snafu(display("No pepper available"))]
    NoPepper { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Pepper Versions                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref VERSION: Regex = Regex::new("^pepper-ver:[-a-zA-Z0-9]+$").unwrap(/* known good */);
}

/// Pepper versions are strings of the form "pepper-ver:[-a-zA-Z0-9]+".
///
/// They're written down alongside each user's password hash, so they must be serializable.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    pub fn new(s: &str) -> Result<Version> {
        ensure!(VERSION.is_match(s), BadVersionSnafu { text: s.to_owned() });
        Ok(Version(s.to_owned()))
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        Version::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             Pepper                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

const PEPPER_LEN: usize = 32;

/// A [Pepper] is a 32-octet key
#[derive(Clone, Debug)]
pub struct Pepper(Key);

impl Pepper {
    pub fn new(key: Key) -> Result<Pepper> {
        ensure!(key.len() == PEPPER_LEN, BadPepperSnafu { len: key.len() });
        Ok(Pepper(key))
    }
}

impl AsRef<Key> for Pepper {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Pepper {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Pepper::new(Key::deserialize(deserializer)?)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

impl Default for Pepper {
    fn default() -> Self {
        Pepper(random_key(PEPPER_LEN))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Peppers                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct Peppers {
    peppers: BTreeMap<Version, Pepper>,
}

impl Default for Peppers {
    fn default() -> Self {
        Peppers {
            peppers: BTreeMap::from_iter(vec![(
                Version(chrono::Local::now().format("pepper-ver:%Y%m%d").to_string()),
                Pepper::default(),
            )]),
        }
    }
}

impl Peppers {
    /// Retrieve the current (i.e. the most recent) Pepper
    pub fn current_pepper(&self) -> Result<(Version, Pepper)> {
        let (key, value) = self.peppers.last_key_value().context(NoPepperSnafu)?;
        Ok((key.clone(), value.clone()))
    }
    /// Retrieve a pepper by version
    pub fn find_by_version(&self, version: &Version) -> Result<Pepper> {
        Ok(self.peppers.get(version).context(NoPepperSnafu)?.clone())
    }
}

impl<const N: usize> From<[(Version, Pepper); N]> for Peppers {
    fn from(value: [(Version, Pepper); N]) -> Self {
        Self {
            peppers: BTreeMap::from(value),
        }
    }
}

#[cfg(test)]
mod pepper_tests {
    use super::*;

    #[test]
    fn rotation_picks_the_latest() {
        let peppers: Peppers = toml::from_str(&format!(
            "\"pepper-ver:2025-02-12\" = {:?}\n\"pepper-ver:2025-02-15\" = {:?}\n",
            vec![1u8; 32],
            vec![2u8; 32]
        ))
        .unwrap();
        let (version, _) = peppers.current_pepper().unwrap();
        assert_eq!("pepper-ver:2025-02-15", version.to_string());
        assert!(peppers
            .find_by_version(&Version::new("pepper-ver:2025-02-12").unwrap())
            .is_ok());
        assert!(peppers
            .find_by_version(&Version::new("pepper-ver:1999").unwrap())
            .is_err());
    }

    #[test]
    fn bad_versions_and_lengths() {
        assert!(Version::new("ver:2025").is_err());
        assert!(Pepper::new(vec![0u8; 16].into()).is_err());
    }
}
