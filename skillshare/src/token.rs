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

//! # skillshare access tokens
//!
//! skillshare authenticates API callers by [JWT]: on login a caller is issued a token naming their
//! [UserId], signed (HS256) with the current signing key & identifying that key in the `kid`
//! header.
//!
//! [JWT]: https://www.rfc-editor.org/rfc/rfc7519.html

use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use jwt::{Header, SignWithKey, Token, VerifyWithKey};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use snafu::{prelude::*, Backtrace};

use crate::{
    entities::UserId,
    http::ErrorKind,
    signing_keys::{self, KeyId, SigningKey, SigningKeys},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Token expired at {expires}"))]
    Expired {
        expires: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to create an HMAC: {source}"))]
    Hmac {
        source: crypto_common::InvalidLength,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to refine a string to a KeyId: {source}"))]
    KeyId {
        source: signing_keys::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("The Key ID was missing from the JWT"))]
    MissingKeyId { backtrace: Backtrace },
    #[snafu(display("No signing key matching {keyid}: {source}"))]
    NoKey {
        keyid: KeyId,
        source: signing_keys::Error,
    },
    #[snafu(display("Invalid token: not before {not_before}"))]
    NotBefore {
        not_before: DateTime<Utc>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to parse JWT: {source}"))]
    Parse {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to sign JWT claims: {source}"))]
    Signature {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token audience {audience}"))]
    UnknownAudience {
        audience: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Unknown token issuer {issuer}"))]
    UnknownIssuer { issuer: String, backtrace: Backtrace },
    #[snafu(display("Verification failure: {source}"))]
    Verification {
        source: jwt::error::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Hmac { .. } | Error::Signature { .. } => ErrorKind::Internal,
            _ => ErrorKind::Unauthorized,
        }
    }
}

type Result<T> = std::result::Result<T, Error>;

/// skillshare access [JWT] [claims]
///
/// [claims]: https://pragmaticwebsecurity.com/articles/apisecurity/hard-parts-of-jwt.html
#[derive(Clone, Debug, Deserialize, Serialize)]
struct AccessClaims {
    #[serde(rename = "iat")]
    issued_at: DateTime<Utc>,
    #[serde(rename = "iss")]
    issuer: String,
    #[serde(rename = "aud")]
    audience: String,
    #[serde(rename = "nbf")]
    not_before: DateTime<Utc>,
    #[serde(rename = "exp")]
    expires: DateTime<Utc>,
    #[serde(rename = "sub")]
    subject: UserId,
}

fn audience(issuer: &str) -> String {
    format!("api.{}", issuer)
}

fn hmac_for(signing_key: &SigningKey) -> Result<Hmac<Sha256>> {
    Hmac::new_from_slice(signing_key.as_ref().expose_secret()).context(HmacSnafu)
}

/// Mint a new JWT
///
/// Mint a new token naming `user`, signed using `signing_key` (identified by `keyid`). The token
/// will be valid for duration `lifetime`. The fully serialized JWT is returned.
pub fn mint_token(
    user: &UserId,
    keyid: &KeyId,
    signing_key: &SigningKey,
    issuer: &str,
    lifetime: &Duration,
) -> Result<String> {
    let now = Utc::now();
    let token = Token::new(
        Header {
            key_id: Some(keyid.to_string()),
            ..Default::default()
        },
        AccessClaims {
            issued_at: now,
            issuer: issuer.to_owned(),
            audience: audience(issuer),
            not_before: now,
            expires: now + *lifetime,
            subject: *user,
        },
    )
    .sign_with_key(&hmac_for(signing_key)?)
    .context(SignatureSnafu)?;
    Ok(token.as_str().to_owned())
}

/// Verify a JWT, returning the [UserId] it names
///
/// The signing key is looked-up by the token's `kid`, so tokens signed with a key that's since
/// been rotated out (but is still configured) continue to verify.
pub fn verify_token(token_string: &str, keys: &SigningKeys, issuer: &str) -> Result<UserId> {
    // Peek at the header to find out which key to verify with
    let unverified: Token<Header, AccessClaims, _> =
        Token::parse_unverified(token_string).context(ParseSnafu)?;
    let keyid = match unverified.header().key_id.as_deref() {
        Some(kid) => KeyId::new(kid).context(KeyIdSnafu)?,
        None => return MissingKeyIdSnafu.fail(),
    };
    let signing_key = keys.find_by_version(&keyid).context(NoKeySnafu { keyid })?;
    let token: Token<Header, AccessClaims, _> = token_string
        .verify_with_key(&hmac_for(&signing_key)?)
        .context(VerificationSnafu)?;
    let claims = token.claims();

    let now = Utc::now();
    ensure!(
        now >= claims.not_before,
        NotBeforeSnafu {
            not_before: claims.not_before,
        }
    );
    ensure!(
        now <= claims.expires,
        ExpiredSnafu {
            expires: claims.expires,
        }
    );
    ensure!(
        issuer == claims.issuer,
        UnknownIssuerSnafu {
            issuer: claims.issuer.clone(),
        }
    );
    ensure!(
        audience(issuer) == claims.audience,
        UnknownAudienceSnafu {
            audience: claims.audience.clone(),
        }
    );

    Ok(claims.subject)
}

#[cfg(test)]
mod access_token_tests {
    use super::*;

    fn key() -> (KeyId, SigningKey) {
        (
            KeyId::new("keyid:20250817").unwrap(/* known good */),
            // With apologies to J.R.R. Tolkein, but I needed 64 bytes exactly.
            SigningKey::new(
                b"All that is gold does not glitter-- Not all who wander are lost.".to_vec(),
            )
            .unwrap(/* known good */),
        )
    }

    #[test]
    fn verify_minted_token() {
        let user = UserId::new();
        let (key_id, signing_key) = key();
        let token = mint_token(
            &user,
            &key_id,
            &signing_key,
            "skillshare.example.com",
            &Duration::seconds(300),
        )
        .unwrap();

        let keys = SigningKeys::from([(key_id, signing_key)]);
        assert_eq!(
            user,
            verify_token(&token, &keys, "skillshare.example.com").unwrap()
        );
        assert!(matches!(
            verify_token(&token, &keys, "elsewhere.example.com"),
            Err(Error::UnknownIssuer { .. })
        ));
    }

    #[test]
    fn expired_and_unknown_keys() {
        let user = UserId::new();
        let (key_id, signing_key) = key();
        let token = mint_token(
            &user,
            &key_id,
            &signing_key,
            "skillshare.example.com",
            &Duration::seconds(-10),
        )
        .unwrap();
        let keys = SigningKeys::from([(key_id, signing_key)]);
        let err = verify_token(&token, &keys, "skillshare.example.com").unwrap_err();
        assert!(matches!(err, Error::Expired { .. }));
        assert_eq!(ErrorKind::Unauthorized, err.kind());

        let other = SigningKeys::from([(KeyId::new("keyid:other").unwrap(), SigningKey::default())]);
        assert!(matches!(
            verify_token(&token, &other, "skillshare.example.com"),
            Err(Error::NoKey { .. })
        ));
        assert!(verify_token("not.a.jwt", &keys, "skillshare.example.com").is_err());
    }
}
