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

//! # skillshare models
//!
//! ## Introduction
//!
//! I dislike catch-all modules named "models" or "entities", but these types are truly
//! foundational: every other module in the crate traffics in them.
//!
//! Each stored type (User, Post, Resource, Comment & LearningPlan) keeps its fields private;
//! mutation goes through methods that maintain that type's invariants (a post's
//! `commitment_complete` flag, a plan's `progress`). Relationships between records are sets of ids,
//! never embedded records.

use std::{collections::HashSet, fmt::Display, ops::Deref, str::FromStr};

use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use chrono::{DateTime, Utc};
use email_address::EmailAddress;
use password_hash::{rand_core::OsRng, PasswordHashString, SaltString};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize};
use snafu::{prelude::*, Backtrace, IntoError};
use tap::Pipe;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::{
    http::ErrorKind,
    peppers::{self, Pepper, Peppers, Version as PepperVersion},
    storage::{Kind, Record},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("{email} is not a valid e-mail address"))]
    BadEmail { email: String, backtrace: Backtrace },
    #[snafu(display("Names must be between two & fifty characters in length"))]
    BadName { name: String, backtrace: Backtrace },
    #[snafu(display("Incorrect password"))]
    BadPassword { backtrace: Backtrace },
    #[snafu(display("{text} is not a resource type"))]
    BadResourceType { text: String, backtrace: Backtrace },
    #[snafu(display("Failed to check the password for user {id}: {source}"))]
    CheckPassword {
        id: UserId,
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to hash password: {source}"))]
    HashPassword {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Bad hash string: {source}"))]
    HashString {
        source: password_hash::errors::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to build an Argon2id password hasher: {source}"))]
    Hasher {
        source: argon2::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("No pepper found for user {id}: {source}"))]
    NoPepper {
        id: UserId,
        source: peppers::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Passwords must be at least {MIN_PASSWORD_LENGTH} characters in length"))]
    PasswordLength { backtrace: Backtrace },
    #[snafu(display("Passwords may not begin or end in whitespace"))]
    PasswordWhitespace { backtrace: Backtrace },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::BadEmail { .. }
            | Error::BadName { .. }
            | Error::BadResourceType { .. }
            | Error::PasswordLength { .. }
            | Error::PasswordWhitespace { .. } => ErrorKind::InvalidOperation,
            Error::BadPassword { .. } => ErrorKind::Unauthorized,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

type StdResult<T, E> = std::result::Result<T, E>;

fn mk_serde_de_err<'de, D: serde::Deserializer<'de>>(err: impl std::error::Error) -> D::Error {
    <D::Error as serde::de::Error>::custom(format!("{}", err))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Timestamps                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// serde support for timestamps in the fixed-width form the storage layer expects
///
/// chrono's own `Serialize` implementation elides trailing zeros in the fractional seconds, which
/// breaks lexical ordering; use `#[serde(with = "timestamp")]` on every stored `DateTime<Utc>`.
pub mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::storage::timestamp_string;

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&timestamp_string(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(de)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(<D::Error as serde::de::Error>::custom)
    }
}

/// As [timestamp], but for `Option<DateTime<Utc>>`
pub mod timestamp_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::storage::timestamp_string;

    pub fn serialize<S: Serializer>(dt: &Option<DateTime<Utc>>, ser: S) -> Result<S::Ok, S::Error> {
        match dt {
            Some(dt) => ser.serialize_some(&timestamp_string(dt)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        de: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        Option::<String>::deserialize(de)?
            .map(|s| {
                DateTime::parse_from_rfc3339(&s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(<D::Error as serde::de::Error>::custom)
            })
            .transpose()
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Identifiers                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Declare a type intended to be used as an opaque identifier for some sort of entity.
///
/// In a NoSQL world, we can't count on an auto-increment column to serve as an opaque identifier;
/// it's up to the application to assign ids. Each id is a [Uuid] wrapped in a newtype so that,
/// say, a [PostId] can't be handed to something expecting a [UserId].
///
/// [Display] produces the hyphenated form, which is also what we serialize (& hence what's
/// stored).
macro_rules! define_id {
    ($type_name:ident) => {
        #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
        #[serde(transparent)]
        pub struct $type_name(Uuid);
        impl $type_name {
            pub fn new() -> $type_name {
                $type_name(Uuid::new_v4())
            }
            pub fn from_raw_string(s: &str) -> StdResult<$type_name, uuid::Error> {
                Ok($type_name(Uuid::parse_str(s)?))
            }
            pub fn to_raw_string(&self) -> String {
                format!("{}", self.0.as_simple())
            }
        }
        impl Default for $type_name {
            fn default() -> Self {
                Self::new()
            }
        }
        impl Display for $type_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0.as_hyphenated())
            }
        }
        impl FromStr for $type_name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> StdResult<Self, Self::Err> {
                $type_name::from_raw_string(s)
            }
        }
    };
}

define_id!(UserId);
define_id!(PostId);
define_id!(ResourceId);
define_id!(CommentId);
define_id!(PlanId);
define_id!(MilestoneId);

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           UserEmail                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A refined type representing an e-mail address
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct UserEmail(String);

impl UserEmail {
    pub fn new(email: &str) -> Result<UserEmail> {
        EmailAddress::is_valid(email)
            .then_some(UserEmail(email.to_string()))
            .context(BadEmailSnafu {
                email: email.to_string(),
            })
    }
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        self.deref()
    }
}

impl Deref for UserEmail {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit address
impl<'de> Deserialize<'de> for UserEmail {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserEmail::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserEmail {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        UserEmail::new(s)
    }
}

impl TryFrom<String> for UserEmail {
    type Error = Error;

    fn try_from(email: String) -> std::result::Result<Self, Self::Error> {
        if EmailAddress::is_valid(&email) {
            Ok(UserEmail(email))
        } else {
            BadEmailSnafu { email }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          DisplayName                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

const MIN_NAME_LENGTH: usize = 2;
const MAX_NAME_LENGTH: usize = 50;

// Length is measured in grapheme clusters, not bytes
fn check_name(s: &str) -> bool {
    let n = s.graphemes(true).count();
    (MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&n) && !s.trim().is_empty()
}

/// A refined type representing a user's name: two to fifty characters
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn new(name: &str) -> Result<DisplayName> {
        check_name(name)
            .then_some(DisplayName(name.to_owned()))
            .context(BadNameSnafu {
                name: name.to_owned(),
            })
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for DisplayName {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        DisplayName::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl Display for DisplayName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DisplayName {
    type Error = Error;

    fn try_from(name: String) -> std::result::Result<Self, Self::Error> {
        if check_name(&name) {
            Ok(DisplayName(name))
        } else {
            BadNameSnafu { name }.fail()
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         UserHashString                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Newtype around [PasswordHashString], which doesn't support serde
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UserHashString(
    #[serde(serialize_with = "serde_hash_string::serialize")] PasswordHashString,
);

impl UserHashString {
    pub fn password_hash(&self) -> PasswordHash<'_> {
        self.0.password_hash()
    }
}

// Implement `Deserialize` by hand to fail if the serialized value isn't a legit hash string
impl<'de> Deserialize<'de> for UserHashString {
    fn deserialize<D>(deserializer: D) -> StdResult<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        UserHashString::try_from(s).map_err(mk_serde_de_err::<'de, D>)
    }
}

impl TryFrom<String> for UserHashString {
    type Error = Error;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Ok(UserHashString(
            PasswordHashString::new(&s).context(HashStringSnafu)?,
        ))
    }
}

mod serde_hash_string {
    use super::*;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        hash_string: &PasswordHashString,
        ser: S,
    ) -> StdResult<S::Ok, S::Error> {
        hash_string
            .as_str()
            .pipe(|s| <str as serde::Serialize>::serialize(s, ser))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              User                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Apply password validation rules
///
/// Passwords must be at least six characters long & may not begin or end with whitespace (that's
/// almost certainly a mistake on the caller's part that will drive them bonkers when they try to
/// log in).
pub fn validate_password(password: &SecretString) -> Result<()> {
    let text = password.expose_secret();
    ensure!(
        !(text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace)),
        PasswordWhitespaceSnafu
    );
    ensure!(
        text.chars().count() >= MIN_PASSWORD_LENGTH,
        PasswordLengthSnafu
    );
    Ok(())
}

/// Represents a skillshare user
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct User {
    id: UserId,
    email: UserEmail,
    name: DisplayName,
    password_hash: UserHashString,
    pepper_version: PepperVersion,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    profile_picture: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    occupation: Option<String>,
    #[serde(default)]
    website: Option<String>,
    enabled: bool,
    #[serde(with = "timestamp")]
    join_date: DateTime<Utc>,
    #[serde(default)]
    following: HashSet<UserId>,
    #[serde(default)]
    followers: HashSet<UserId>,
    #[serde(default)]
    version: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// The mutable parts of a user's profile; `None` leaves a field unchanged
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProfileUpdate {
    pub name: Option<DisplayName>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
    pub location: Option<String>,
    pub occupation: Option<String>,
    pub website: Option<String>,
}

impl User {
    /// Create a new [User]
    ///
    /// This constructor will validate & hash the password, but will *not* check the e-mail
    /// address for uniqueness; that's the caller's job.
    pub fn new(
        pepper_version: &PepperVersion,
        pepper_key: &Pepper,
        email: &UserEmail,
        name: &DisplayName,
        password: &SecretString,
    ) -> Result<User> {
        validate_password(password)?;
        let password_hash = User::hash_password(pepper_key, password)?;
        let now = Utc::now();
        Ok(User {
            id: UserId::new(),
            email: email.clone(),
            name: name.clone(),
            password_hash: UserHashString(password_hash),
            pepper_version: pepper_version.clone(),
            bio: None,
            profile_picture: None,
            location: None,
            occupation: None,
            website: None,
            enabled: true,
            join_date: now,
            following: HashSet::new(),
            followers: HashSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
    /// Validate a password
    pub fn check_password(&self, peppers: &Peppers, password: SecretString) -> Result<()> {
        let pepper = peppers
            .find_by_version(&self.pepper_version)
            .context(NoPepperSnafu { id: self.id })?;
        let hasher = User::create_password_hasher(&pepper)?;
        match hasher.verify_password(
            password.expose_secret().as_bytes(),
            &self.password_hash.password_hash(),
        ) {
            Ok(_) => Ok(()),
            Err(password_hash::errors::Error::Password) => BadPasswordSnafu.fail(),
            Err(err) => Err(CheckPasswordSnafu { id: self.id }.into_error(err)),
        }
    }
    /// Replace this user's password, re-hashing it under the current pepper
    pub fn set_password(&mut self, peppers: &Peppers, password: &SecretString) -> Result<()> {
        validate_password(password)?;
        let (version, pepper) = peppers
            .current_pepper()
            .context(NoPepperSnafu { id: self.id })?;
        self.password_hash = UserHashString(User::hash_password(&pepper, password)?);
        self.pepper_version = version;
        Ok(())
    }
    pub fn apply(&mut self, update: ProfileUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if update.bio.is_some() {
            self.bio = update.bio;
        }
        if update.profile_picture.is_some() {
            self.profile_picture = update.profile_picture;
        }
        if update.location.is_some() {
            self.location = update.location;
        }
        if update.occupation.is_some() {
            self.occupation = update.occupation;
        }
        if update.website.is_some() {
            self.website = update.website;
        }
    }
    pub fn bio(&self) -> Option<&str> {
        self.bio.as_deref()
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn email(&self) -> &UserEmail {
        &self.email
    }
    pub fn enabled(&self) -> bool {
        self.enabled
    }
    pub fn followers(&self) -> &HashSet<UserId> {
        &self.followers
    }
    pub fn following(&self) -> &HashSet<UserId> {
        &self.following
    }
    pub fn id(&self) -> UserId {
        self.id
    }
    pub fn is_following(&self, other: &UserId) -> bool {
        self.following.contains(other)
    }
    pub fn join_date(&self) -> DateTime<Utc> {
        self.join_date
    }
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref()
    }
    pub fn name(&self) -> &DisplayName {
        &self.name
    }
    pub fn occupation(&self) -> Option<&str> {
        self.occupation.as_deref()
    }
    pub fn pepper_version(&self) -> PepperVersion {
        self.pepper_version.clone()
    }
    pub fn profile_picture(&self) -> Option<&str> {
        self.profile_picture.as_deref()
    }
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
    pub fn website(&self) -> Option<&str> {
        self.website.as_deref()
    }
    // Each of these edits one side of a follow edge only; keeping the two sides in step is the
    // relationship engine's job.
    pub fn add_following(&mut self, other: UserId) -> bool {
        self.following.insert(other)
    }
    pub fn remove_following(&mut self, other: &UserId) -> bool {
        self.following.remove(other)
    }
    pub fn add_follower(&mut self, other: UserId) -> bool {
        self.followers.insert(other)
    }
    pub fn remove_follower(&mut self, other: &UserId) -> bool {
        self.followers.remove(other)
    }
    /// Create a skillshare user password hasher
    ///
    /// This function returns a [PasswordHasher] employing the Argon2id algorithm (with pepper) with
    /// the default parameters (m=19456 (19 MiB), t=2, p=1), which comport with the OWASP Password
    /// Storage [Cheat Sheet].
    ///
    /// [Cheat Sheet]: https://cheatsheetseries.owasp.org/cheatsheets/Password_Storage_Cheat_Sheet.html#password-hashing-algorithms
    fn create_password_hasher(pepper: &Pepper) -> Result<Argon2<'_>> {
        Argon2::new_with_secret(
            pepper.as_ref().expose_secret(),
            Algorithm::Argon2id,
            Version::default(),
            Params::default(),
        )
        .context(HasherSnafu)
    }
    /// Salt & hash a password; the pepper is supplied as the Argon2 `secret`
    fn hash_password(pepper: &Pepper, password: &SecretString) -> Result<PasswordHashString> {
        let salt = SaltString::generate(&mut OsRng);
        let hasher = User::create_password_hasher(pepper)?;
        Ok(hasher
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .context(HashPasswordSnafu)?
            .serialize())
    }
}

impl Record for User {
    const KIND: Kind = Kind::User;
    type Id = UserId;
    fn id(&self) -> UserId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                              Post                                              //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Represents a skillshare post
///
/// A post may carry a commitment: a goal (the number of users who must commit to it) and an
/// optional deadline. `commitment_complete` is derived from the other two, but it's persisted so
/// that it can be queried on.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Post {
    id: PostId,
    author: UserId,
    title: String,
    content: String,
    #[serde(default)]
    images: Vec<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    likes: HashSet<UserId>,
    #[serde(default)]
    commits: HashSet<UserId>,
    #[serde(default)]
    commitment_goal: u32,
    #[serde(default, with = "timestamp_opt")]
    commitment_deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    commitment_complete: bool,
    #[serde(default)]
    version: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// The author-editable parts of a post
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PostContent {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub commitment_goal: u32,
    #[serde(default, with = "timestamp_opt")]
    pub commitment_deadline: Option<DateTime<Utc>>,
}

impl Post {
    pub fn new(author: &UserId, content: PostContent) -> Post {
        Post::new_at(author, content, Utc::now())
    }
    /// As [Post::new], but with an explicit creation time
    pub fn new_at(author: &UserId, content: PostContent, created_at: DateTime<Utc>) -> Post {
        let mut post = Post {
            id: PostId::new(),
            author: *author,
            title: content.title,
            content: content.content,
            images: content.images,
            video_url: content.video_url,
            likes: HashSet::new(),
            commits: HashSet::new(),
            commitment_goal: content.commitment_goal,
            commitment_deadline: content.commitment_deadline,
            commitment_complete: false,
            version: 0,
            created_at,
            updated_at: created_at,
        };
        post.recompute_completion();
        post
    }
    /// Replace the author-editable content; the author, likes & commits are untouched
    pub fn revise(&mut self, content: PostContent) {
        self.title = content.title;
        self.content = content.content;
        self.images = content.images;
        self.video_url = content.video_url;
        self.commitment_goal = content.commitment_goal;
        self.commitment_deadline = content.commitment_deadline;
        self.recompute_completion();
    }
    /// Add `user` to the set of committers; false means they were already there
    pub fn add_commit(&mut self, user: UserId) -> bool {
        let added = self.commits.insert(user);
        self.recompute_completion();
        added
    }
    /// Remove `user` from the set of committers; false means they weren't there
    pub fn remove_commit(&mut self, user: &UserId) -> bool {
        let removed = self.commits.remove(user);
        self.recompute_completion();
        removed
    }
    /// Flip `user`'s membership in this post's likes; true means the post is now liked
    pub fn toggle_like(&mut self, user: UserId) -> bool {
        if !self.likes.remove(&user) {
            self.likes.insert(user);
            true
        } else {
            false
        }
    }
    pub fn remove_like(&mut self, user: &UserId) -> bool {
        self.likes.remove(user)
    }
    // Recomputed in both directions: withdrawing can take a post from complete back to incomplete
    fn recompute_completion(&mut self) {
        self.commitment_complete = self.commits.len() >= self.commitment_goal as usize;
    }
    pub fn author(&self) -> UserId {
        self.author
    }
    pub fn commitment_complete(&self) -> bool {
        self.commitment_complete
    }
    pub fn commitment_deadline(&self) -> Option<DateTime<Utc>> {
        self.commitment_deadline
    }
    pub fn commitment_goal(&self) -> u32 {
        self.commitment_goal
    }
    pub fn commits(&self) -> &HashSet<UserId> {
        &self.commits
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn id(&self) -> PostId {
        self.id
    }
    pub fn images(&self) -> &[String] {
        &self.images
    }
    pub fn likes(&self) -> &HashSet<UserId> {
        &self.likes
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
    pub fn video_url(&self) -> Option<&str> {
        self.video_url.as_deref()
    }
}

impl Record for Post {
    const KIND: Kind = Kind::Post;
    type Id = PostId;
    fn id(&self) -> PostId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Resource                                            //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Article,
    Video,
    Book,
    Tool,
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::Article => "ARTICLE",
            ResourceType::Video => "VIDEO",
            ResourceType::Book => "BOOK",
            ResourceType::Tool => "TOOL",
        };
        write!(f, "{}", s)
    }
}

// Accept any case; path segments come from humans
impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ARTICLE" => Ok(ResourceType::Article),
            "VIDEO" => Ok(ResourceType::Video),
            "BOOK" => Ok(ResourceType::Book),
            "TOOL" => Ok(ResourceType::Tool),
            _ => BadResourceTypeSnafu { text: s.to_owned() }.fail(),
        }
    }
}

/// A learning resource shared by a user
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Resource {
    id: ResourceId,
    owner: UserId,
    title: String,
    description: String,
    url: String,
    resource_type: ResourceType,
    skill_category: String,
    #[serde(default)]
    likes: HashSet<UserId>,
    #[serde(default)]
    version: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// The owner-editable parts of a resource
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ResourceContent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    pub resource_type: ResourceType,
    pub skill_category: String,
}

impl Resource {
    pub fn new(owner: &UserId, content: ResourceContent) -> Resource {
        let now = Utc::now();
        Resource {
            id: ResourceId::new(),
            owner: *owner,
            title: content.title,
            description: content.description,
            url: content.url,
            resource_type: content.resource_type,
            skill_category: content.skill_category,
            likes: HashSet::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
    pub fn revise(&mut self, content: ResourceContent) {
        self.title = content.title;
        self.description = content.description;
        self.url = content.url;
        self.resource_type = content.resource_type;
        self.skill_category = content.skill_category;
    }
    pub fn is_owner(&self, user: &UserId) -> bool {
        self.owner == *user
    }
    pub fn toggle_like(&mut self, user: UserId) -> bool {
        if !self.likes.remove(&user) {
            self.likes.insert(user);
            true
        } else {
            false
        }
    }
    pub fn remove_like(&mut self, user: &UserId) -> bool {
        self.likes.remove(user)
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn id(&self) -> ResourceId {
        self.id
    }
    pub fn likes(&self) -> &HashSet<UserId> {
        &self.likes
    }
    pub fn owner(&self) -> UserId {
        self.owner
    }
    pub fn resource_type(&self) -> ResourceType {
        self.resource_type
    }
    pub fn skill_category(&self) -> &str {
        &self.skill_category
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Record for Resource {
    const KIND: Kind = Kind::Resource;
    type Id = ResourceId;
    fn id(&self) -> ResourceId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Comment                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Comment {
    id: CommentId,
    post: PostId,
    author: UserId,
    content: String,
    #[serde(default)]
    version: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(post: &PostId, author: &UserId, content: &str) -> Comment {
        let now = Utc::now();
        Comment {
            id: CommentId::new(),
            post: *post,
            author: *author,
            content: content.to_owned(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
    pub fn set_content(&mut self, content: &str) {
        self.content = content.to_owned();
    }
    pub fn author(&self) -> UserId {
        self.author
    }
    pub fn content(&self) -> &str {
        &self.content
    }
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
    pub fn id(&self) -> CommentId {
        self.id
    }
    pub fn post(&self) -> PostId {
        self.post
    }
}

impl Record for Comment {
    const KIND: Kind = Kind::Comment;
    type Id = CommentId;
    fn id(&self) -> CommentId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         Learning Plans                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Milestone {
    id: MilestoneId,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, with = "timestamp_opt")]
    target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    completed: bool,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// What a caller supplies to create a milestone
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MilestoneContent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "timestamp_opt")]
    pub target_date: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn new(content: MilestoneContent) -> Milestone {
        let now = Utc::now();
        Milestone {
            id: MilestoneId::new(),
            title: content.title,
            description: content.description,
            target_date: content.target_date,
            completed: false,
            created_at: now,
            updated_at: now,
        }
    }
    pub fn completed(&self) -> bool {
        self.completed
    }
    pub fn id(&self) -> MilestoneId {
        self.id
    }
    pub fn target_date(&self) -> Option<DateTime<Utc>> {
        self.target_date
    }
    pub fn title(&self) -> &str {
        &self.title
    }
}

/// A user's plan for learning something, broken down into milestones
///
/// `progress` is the percentage of milestones completed, rounded to the nearest integer (zero for
/// a plan with no milestones).
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct LearningPlan {
    id: PlanId,
    owner: UserId,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    milestones: Vec<Milestone>,
    #[serde(default, with = "timestamp_opt")]
    start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp_opt")]
    target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: HashSet<String>,
    #[serde(default)]
    progress: u8,
    #[serde(default)]
    version: u64,
    #[serde(with = "timestamp")]
    created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    updated_at: DateTime<Utc>,
}

/// The owner-editable parts of a learning plan (milestones are managed individually)
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct PlanContent {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, with = "timestamp_opt")]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp_opt")]
    pub target_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: HashSet<String>,
}

impl LearningPlan {
    pub fn new(owner: &UserId, content: PlanContent) -> LearningPlan {
        let now = Utc::now();
        LearningPlan {
            id: PlanId::new(),
            owner: *owner,
            title: content.title,
            description: content.description,
            milestones: Vec::new(),
            start_date: content.start_date,
            target_date: content.target_date,
            tags: content.tags,
            progress: 0,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
    pub fn revise(&mut self, content: PlanContent) {
        self.title = content.title;
        self.description = content.description;
        self.start_date = content.start_date;
        self.target_date = content.target_date;
        self.tags = content.tags;
        self.recompute_progress();
    }
    pub fn add_milestone(&mut self, milestone: Milestone) {
        self.milestones.push(milestone);
        self.recompute_progress();
    }
    /// Mark a milestone (in)complete; false means there's no such milestone
    pub fn set_milestone_completed(&mut self, id: &MilestoneId, completed: bool) -> bool {
        match self.milestones.iter_mut().find(|m| m.id == *id) {
            Some(m) => {
                m.completed = completed;
                m.updated_at = Utc::now();
                self.recompute_progress();
                true
            }
            None => false,
        }
    }
    /// false means there's no such milestone
    pub fn remove_milestone(&mut self, id: &MilestoneId) -> bool {
        let before = self.milestones.len();
        self.milestones.retain(|m| m.id != *id);
        self.recompute_progress();
        self.milestones.len() != before
    }
    fn recompute_progress(&mut self) {
        let total = self.milestones.len();
        let done = self.milestones.iter().filter(|m| m.completed).count();
        self.progress = if total == 0 {
            0
        } else {
            ((100.0 * done as f64) / total as f64).round() as u8
        };
    }
    pub fn is_owner(&self, user: &UserId) -> bool {
        self.owner == *user
    }
    pub fn id(&self) -> PlanId {
        self.id
    }
    pub fn milestones(&self) -> &[Milestone] {
        &self.milestones
    }
    pub fn owner(&self) -> UserId {
        self.owner
    }
    pub fn progress(&self) -> u8 {
        self.progress
    }
    pub fn tags(&self) -> &HashSet<String> {
        &self.tags
    }
    pub fn title(&self) -> &str {
        &self.title
    }
}

impl Record for LearningPlan {
    const KIND: Kind = Kind::LearningPlan;
    type Id = PlanId;
    fn id(&self) -> PlanId {
        self.id
    }
    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn pepper() -> (PepperVersion, Pepper) {
        Peppers::default().current_pepper().unwrap()
    }

    #[test]
    fn names() {
        assert!(DisplayName::new("Al").is_ok());
        assert!(DisplayName::new("A").is_err());
        assert!(DisplayName::new(&"x".repeat(51)).is_err());
        assert!(DisplayName::new("Zoë").is_ok());
        assert!(DisplayName::new("  ").is_err());
        assert!(serde_json::from_str::<DisplayName>("\"J\"").is_err());
    }

    #[test]
    fn passwords() {
        assert!(validate_password(&SecretString::from("f00bar")).is_ok());
        assert!(validate_password(&SecretString::from("short")).is_err());
        assert!(validate_password(&SecretString::from(" padded ")).is_err());

        let (ver, pep) = pepper();
        let peppers = Peppers::from([(ver.clone(), pep.clone())]);
        let user = User::new(
            &ver,
            &pep,
            &UserEmail::new("jdoe@example.com").unwrap(),
            &DisplayName::new("John Doe").unwrap(),
            &SecretString::from("f00bar"),
        )
        .unwrap();
        assert!(user.check_password(&peppers, "f00bar".into()).is_ok());
        assert!(matches!(
            user.check_password(&peppers, "f00baz".into()),
            Err(Error::BadPassword { .. })
        ));
        // A different pepper under the same version won't verify
        assert!(user
            .check_password(&Peppers::default(), "f00bar".into())
            .is_err());
        assert!(serde_json::to_string(&user)
            .unwrap()
            .contains("\"password_hash\":\"$argon2id$"));
    }

    #[test]
    fn commitment_completion() {
        let author = UserId::new();
        let mut post = Post::new(
            &author,
            PostContent {
                title: "Rust".to_owned(),
                content: "Let's learn Rust".to_owned(),
                commitment_goal: 2,
                ..Default::default()
            },
        );
        assert!(!post.commitment_complete());
        let (a, b) = (UserId::new(), UserId::new());
        assert!(post.add_commit(a));
        assert!(!post.commitment_complete());
        assert!(post.add_commit(b));
        assert!(post.commitment_complete());
        assert!(!post.add_commit(b));
        assert!(post.remove_commit(&a));
        assert!(!post.commitment_complete());
        post.revise(PostContent {
            title: "Rust".to_owned(),
            content: "Let's learn Rust".to_owned(),
            commitment_goal: 1,
            ..Default::default()
        });
        assert!(post.commitment_complete());
    }

    #[test]
    fn plan_progress() {
        let mut plan = LearningPlan::new(
            &UserId::new(),
            PlanContent {
                title: "Rust".to_owned(),
                ..Default::default()
            },
        );
        assert_eq!(0, plan.progress());
        let ids: Vec<MilestoneId> = (0..3)
            .map(|i| {
                let m = Milestone::new(MilestoneContent {
                    title: format!("step {i}"),
                    description: String::new(),
                    target_date: None,
                });
                let id = m.id();
                plan.add_milestone(m);
                id
            })
            .collect();
        assert!(plan.set_milestone_completed(&ids[0], true));
        assert_eq!(33, plan.progress());
        assert!(plan.set_milestone_completed(&ids[1], true));
        assert_eq!(67, plan.progress());
        assert!(plan.remove_milestone(&ids[2]));
        assert_eq!(100, plan.progress());
        assert!(!plan.remove_milestone(&ids[2]));
    }

    #[test]
    fn resource_types() {
        assert_eq!(ResourceType::Book, "book".parse::<ResourceType>().unwrap());
        assert_eq!(
            "\"ARTICLE\"",
            serde_json::to_string(&ResourceType::Article).unwrap()
        );
        assert!("podcast".parse::<ResourceType>().is_err());
    }
}
