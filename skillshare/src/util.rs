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

//! # util
//!
//! Odds & ends that don't belong anywhere else: splitting header values, secret keys read from
//! configuration & credentials read from the command line.

use std::{fmt::Display, ops::Deref};

use either::Either;
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use serde::{Deserialize, Deserializer};
use serde_bytes::ByteBuf;
use tap::{Conv, Pipe};

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          exactly_two                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The ways in which an iterator can fail to yield exactly two items
#[derive(Debug)]
pub struct ExactlyTwoError<T: std::iter::Iterator> {
    #[allow(clippy::type_complexity)]
    cause: Option<Either<T::Item, (T::Item, T::Item, T::Item)>>,
}

impl<T: std::iter::Iterator> Display for ExactlyTwoError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(Either::Left(_)) => write!(f, "expected two elements; got one"),
            Some(Either::Right(_)) => write!(f, "expected two elements; got three or more"),
            None => write!(f, "expected two elements; got none"),
        }
    }
}

impl<T: std::iter::Iterator> ExactlyTwoError<T> {
    pub fn is_empty(&self) -> bool {
        self.cause.is_none()
    }
}

/// Pull exactly two items off `iter`, failing if there are fewer or more
pub fn exactly_two<T>(mut iter: T) -> std::result::Result<(T::Item, T::Item), ExactlyTwoError<T>>
where
    T: std::iter::Iterator,
{
    match (iter.next(), iter.next(), iter.next()) {
        (Some(first), Some(second), None) => Ok((first, second)),
        (Some(first), Some(second), Some(third)) => Err(ExactlyTwoError {
            cause: Some(Either::Right((first, second, third))),
        }),
        (Some(first), None, _) => Err(ExactlyTwoError {
            cause: Some(Either::Left(first)),
        }),
        (None, _, _) => Err(ExactlyTwoError { cause: None }),
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Key                                               //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A general-purpose secret key: a deserializable, secret, slice of bytes
#[derive(Clone, Debug)]
pub struct Key(SecretSlice<u8>);

impl Key {
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }
}

impl AsRef<SecretSlice<u8>> for Key {
    fn as_ref(&self) -> &SecretSlice<u8> {
        self.deref()
    }
}

impl Deref for Key {
    type Target = SecretSlice<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Accepts either a TOML array of integers or a byte string
impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        <ByteBuf as serde::Deserialize>::deserialize(deserializer)
            .map_err(|err| <D::Error as serde::de::Error>::custom(format!("{:?}", err)))?
            .pipe(|x| x.into_vec())
            .conv::<SecretSlice<u8>>()
            .pipe(Key)
            .pipe(Ok)
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Key(value.into())
    }
}

/// Produce `n` random bytes suitable for use as key material
pub fn random_key(n: usize) -> Key {
    use rand::RngCore;
    let mut bytes: Vec<u8> = vec![0; n];
    argon2::password_hash::rand_core::OsRng.fill_bytes(&mut bytes);
    bytes.into()
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                      generic credentials                                       //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A pair of secrets (an access key ID & a secret access key, say) given as "id,secret"
#[derive(Clone, Debug, Deserialize)]
pub struct Credentials(pub (SecretString, SecretString));

impl clap::builder::ValueParserFactory for Credentials {
    type Parser = CredentialsParser;

    fn value_parser() -> Self::Parser {
        CredentialsParser
    }
}

#[derive(Clone, Debug)]
pub struct CredentialsParser;

impl clap::builder::TypedValueParser for CredentialsParser {
    type Value = Credentials;

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> std::result::Result<Self::Value, clap::Error> {
        use clap::error::ErrorKind;
        value
            .to_str()
            .ok_or(clap::Error::new(ErrorKind::InvalidValue))?
            .split(',')
            .pipe(exactly_two)
            .map_err(|_| clap::Error::new(ErrorKind::WrongNumberOfValues))?
            .pipe(|p| (p.0.into(), p.1.into()))
            .pipe(Credentials)
            .pipe(Ok)
    }
}

#[cfg(test)]
mod util_tests {
    use super::*;

    #[test]
    fn two_and_only_two() {
        assert_eq!(("a", "b"), exactly_two("a b".split(' ')).unwrap());
        assert!(exactly_two("a".split(' ')).is_err());
        assert!(exactly_two("a b c".split(' ')).is_err());
        assert!(exactly_two(std::iter::empty::<u8>()).unwrap_err().is_empty());
    }

    #[test]
    fn keys_from_toml() {
        #[derive(Deserialize)]
        struct Holder {
            key: Key,
        }
        let h: Holder = toml::from_str("key = [1, 2, 3, 4]").unwrap();
        assert_eq!(4, h.key.len());
        assert_eq!(&[1u8, 2, 3, 4], h.key.expose_secret());
        assert_eq!(32, random_key(32).len());
    }
}
