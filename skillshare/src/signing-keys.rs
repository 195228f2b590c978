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

//! # skillshare signing keys
//!
//! skillshare signs JWTs for authentication purposes. This module, like [peppers], keeps signing
//! keys in memory & supports versioning and rotating them.
//!
//! [peppers]: crate::peppers
//!
//! The set of currently supported keys is read from configuration:
//!
//! ```toml
//! [signing-keys]
//! "keyid:2025-02-12" = [1, 2, 3, 4, ..., 64] # Keys must be 64 octets in length
//! "keyid:2025-02-15" = [65, 66, 67,..., 128]
//! ```
//!
//! New tokens are always signed with the most recent key; each token names its key in the `kid`
//! header so that tokens minted under an older key continue to verify until that key is removed
//! from configuration.

use std::{collections::BTreeMap, fmt::Display, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use snafu::{prelude::*, Backtrace};

use crate::util::{random_key, Key};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to recognize {text} as a KeyId"))]
    KeyId { text: String, backtrace: Backtrace },
    #[snafu(display("No signing key available"))]
    NoKey { backtrace: Backtrace },
    #[snafu(display("Signing keys must be 64 octets in length"))]
    SigningKey { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                             KeyId                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

lazy_static! {
    static ref KEY_ID : Regex = Regex::new("^keyid:[-0-9a-zA-Z]+$").unwrap(/* known good */);
}

#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn new(s: &str) -> Result<KeyId> {
        ensure!(KEY_ID.is_match(s), KeyIdSnafu { text: s.to_owned() });
        Ok(KeyId(s.to_owned()))
    }
}

impl<'de> Deserialize<'de> for KeyId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        KeyId::new(&s).map_err(|err| <D::Error as serde::de::Error>::custom(format!("{}", err)))
    }
}

impl Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for KeyId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        KeyId::new(s)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<KeyId> for String {
    fn from(value: KeyId) -> Self {
        value.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           SigningKey                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const SIGNING_KEY_LEN: usize = 64;

/// A key of exactly 64 octets
#[derive(Clone, Debug)]
pub struct SigningKey(Key);

impl SigningKey {
    pub fn new(b: Vec<u8>) -> Result<SigningKey> {
        ensure!(b.len() == SIGNING_KEY_LEN, SigningKeySnafu);
        Ok(SigningKey(b.into()))
    }
}

impl<'de> Deserialize<'de> for SigningKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let key = Key::deserialize(deserializer)?;
        if key.len() == SIGNING_KEY_LEN {
            Ok(SigningKey(key))
        } else {
            Err(<D::Error as serde::de::Error>::custom(
                "signing keys must be 64 octets in length",
            ))
        }
    }
}

impl Default for SigningKey {
    fn default() -> Self {
        SigningKey(random_key(SIGNING_KEY_LEN))
    }
}

impl AsRef<Key> for SigningKey {
    fn as_ref(&self) -> &Key {
        &self.0
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          SigningKeys                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize)]
#[serde(transparent)]
pub struct SigningKeys {
    keys: BTreeMap<KeyId, SigningKey>,
}

impl SigningKeys {
    /// Retrieve the current (i.e. the most recent) SigningKey
    pub fn current(&self) -> Result<(KeyId, SigningKey)> {
        let (key, value) = self.keys.last_key_value().context(NoKeySnafu)?;
        Ok((key.clone(), value.clone()))
    }
    /// Retrieve a signing key by id
    pub fn find_by_version(&self, keyid: &KeyId) -> Result<SigningKey> {
        Ok(self.keys.get(keyid).context(NoKeySnafu)?.clone())
    }
}

impl Default for SigningKeys {
    fn default() -> Self {
        SigningKeys {
            keys: BTreeMap::from_iter(vec![(
                KeyId(chrono::Local::now().format("keyid:%Y%m%d").to_string()),
                SigningKey::default(),
            )]),
        }
    }
}

impl<const N: usize> From<[(KeyId, SigningKey); N]> for SigningKeys {
    fn from(value: [(KeyId, SigningKey); N]) -> Self {
        Self {
            keys: BTreeMap::from(value),
        }
    }
}

#[cfg(test)]
mod signing_key_tests {
    use super::*;

    #[test]
    fn key_ids() {
        assert!(KeyId::new("keyid:2025-02-12").is_ok());
        assert!(KeyId::new("2025-02-12").is_err());
        assert!(KeyId::new("keyid:").is_err());
    }

    #[test]
    fn current_key() {
        let keys = SigningKeys::from([
            (KeyId::new("keyid:a").unwrap(), SigningKey::default()),
            (KeyId::new("keyid:b").unwrap(), SigningKey::default()),
        ]);
        assert_eq!("keyid:b", keys.current().unwrap().0.to_string());
        assert!(SigningKey::new(vec![0; 32]).is_err());
    }
}
