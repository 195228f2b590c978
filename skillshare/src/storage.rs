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

//! # storage
//!
//! Abstractions for the skillshare storage layer.
//!
//! # Introduction
//!
//! skillshare keeps five sorts of record (users, posts, resources, comments & learning plans) in a
//! document store. Rather than teach each backend about each record type, the [Backend] trait
//! deals only in JSON documents tagged with a [Kind]; the functions at the bottom of this module
//! ([get], [fetch], [put], [delete] & [query]) provide the typed facade the rest of the crate uses.
//!
//! That keeps [Backend] object-safe (no generic methods), so the choice of backend can be deferred
//! to configuration time & held as an `Arc<dyn Backend + Send + Sync>`.
//!
//! # Versioning
//!
//! Every record carries a `version` attribute. A write names the version the caller read (or
//! `None` for a brand-new record); the backend rejects the write with [Error::Conflict] if the
//! stored version has moved on, and otherwise stores the record with the version incremented by
//! one. Nothing in this crate retries on conflict; the caller gets to decide.

use std::{cmp::Ordering, fmt::Display};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use snafu::{prelude::*, Backtrace};

use crate::http::ErrorKind;

/// A stored record, as the backends see it
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Storage backend failure: {source}"))]
    Backend {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[snafu(display("Stale write to {kind} {id}; expected version {expected:?}"))]
    Conflict {
        kind: Kind,
        id: String,
        expected: Option<u64>,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to deserialize a {kind}: {source}"))]
    De {
        kind: Kind,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("A {kind} did not serialize to a JSON object"))]
    NotAnObject { kind: Kind, backtrace: Backtrace },
    #[snafu(display("No {kind} with id {id}"))]
    NotFound {
        kind: Kind,
        id: String,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to serialize a {kind}: {source}"))]
    Ser {
        kind: Kind,
        source: serde_json::Error,
        backtrace: Backtrace,
    },
}

impl Error {
    /// Wrap an arbitrary backend error
    pub fn new(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Backend {
            source: Box::new(err),
        }
    }
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::NotFound { .. } => ErrorKind::NotFound,
            _ => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          Record kinds                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// The sorts of record skillshare stores
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Kind {
    User,
    Post,
    Resource,
    Comment,
    LearningPlan,
}

impl Kind {
    /// The name of the collection (or table) holding records of this kind
    pub fn collection(&self) -> &'static str {
        match self {
            Kind::User => "users",
            Kind::Post => "posts",
            Kind::Resource => "resources",
            Kind::Comment => "comments",
            Kind::LearningPlan => "learning_plans",
        }
    }
    pub fn all() -> [Kind; 5] {
        [
            Kind::User,
            Kind::Post,
            Kind::Resource,
            Kind::Comment,
            Kind::LearningPlan,
        ]
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Kind::User => "user",
            Kind::Post => "post",
            Kind::Resource => "resource",
            Kind::Comment => "comment",
            Kind::LearningPlan => "learning plan",
        };
        write!(f, "{}", s)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Timestamps                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Render a timestamp the way skillshare stores it
///
/// Timestamps are written as RFC 3339 strings with a fixed number of fractional digits, always in
/// UTC, so that they sort lexicographically in the same order they sort chronologically. Every
/// backend relies on that for range predicates & ordering.
pub fn timestamp_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Predicates                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A filter over stored documents
///
/// Field names are top-level document attributes. Backends are free to translate a [Predicate]
/// into their native query language ([mongo](crate::mongo) does) or to evaluate it in-process via
/// [Predicate::matches] ([memory](crate::memory) and [dynamodb](crate::dynamodb) do).
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Matches everything
    All,
    /// Exact equality on a field
    Eq(&'static str, Value),
    /// The field's value is one of the given values
    In(&'static str, Vec<Value>),
    /// The field is an array containing the given value
    Contains(&'static str, Value),
    /// Case-insensitive substring match on a textual field
    ContainsText(&'static str, String),
    /// The (integral) field is strictly greater than the given value
    Gt(&'static str, i64),
    /// The (integral) field is strictly less than the given value
    Lt(&'static str, i64),
    /// The field is a timestamp strictly after `after` and strictly before `before`; a missing
    /// bound is unconstrained
    Range {
        field: &'static str,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: &'static str, value: impl Serialize) -> Predicate {
        Predicate::Eq(field, serde_json::to_value(value).unwrap_or(Value::Null))
    }
    pub fn any_of<I, T>(field: &'static str, values: I) -> Predicate
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        Predicate::In(
            field,
            values
                .into_iter()
                .filter_map(|v| serde_json::to_value(v).ok())
                .collect(),
        )
    }
    pub fn contains(field: &'static str, value: impl Serialize) -> Predicate {
        Predicate::Contains(field, serde_json::to_value(value).unwrap_or(Value::Null))
    }
    pub fn text(field: &'static str, needle: &str) -> Predicate {
        Predicate::ContainsText(field, needle.to_owned())
    }
    pub fn after(field: &'static str, dt: DateTime<Utc>) -> Predicate {
        Predicate::Range {
            field,
            after: Some(dt),
            before: None,
        }
    }
    /// Evaluate this predicate against a document
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => doc.get(*field).is_some_and(|v| v == value),
            Predicate::In(field, values) => doc
                .get(*field)
                .is_some_and(|v| values.iter().any(|x| x == v)),
            Predicate::Contains(field, value) => match doc.get(*field) {
                Some(Value::Array(elts)) => elts.iter().any(|x| x == value),
                _ => false,
            },
            Predicate::ContainsText(field, needle) => match doc.get(*field) {
                Some(Value::String(s)) => s.to_lowercase().contains(&needle.to_lowercase()),
                _ => false,
            },
            Predicate::Gt(field, n) => doc
                .get(*field)
                .and_then(Value::as_i64)
                .is_some_and(|v| v > *n),
            Predicate::Lt(field, n) => doc
                .get(*field)
                .and_then(Value::as_i64)
                .is_some_and(|v| v < *n),
            Predicate::Range {
                field,
                after,
                before,
            } => match doc.get(*field).and_then(Value::as_str).and_then(parse_timestamp) {
                Some(dt) => {
                    after.is_none_or(|lower| dt > lower) && before.is_none_or(|upper| dt < upper)
                }
                None => false,
            },
            Predicate::And(preds) => preds.iter().all(|p| p.matches(doc)),
            Predicate::Or(preds) => preds.iter().any(|p| p.matches(doc)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        Sorting & Paging                                        //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Order {
    Ascending,
    Descending,
}

/// Result ordering; ties are always broken by record id so that paging is stable
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sort {
    pub field: &'static str,
    pub order: Order,
}

impl Sort {
    pub fn ascending(field: &'static str) -> Sort {
        Sort {
            field,
            order: Order::Ascending,
        }
    }
    pub fn descending(field: &'static str) -> Sort {
        Sort {
            field,
            order: Order::Descending,
        }
    }
    /// Most recently created first
    pub fn newest_first() -> Sort {
        Sort::descending("created_at")
    }
    /// Compare two documents according to this ordering
    pub fn compare(&self, lhs: &Document, rhs: &Document) -> Ordering {
        let primary = compare_values(lhs.get(self.field), rhs.get(self.field));
        let primary = match self.order {
            Order::Ascending => primary,
            Order::Descending => primary.reverse(),
        };
        primary.then_with(|| compare_values(lhs.get("id"), rhs.get("id")))
    }
}

// Nulls & missing attributes sort first, as they do in MongoDB
fn compare_values(lhs: Option<&Value>, rhs: Option<&Value>) -> Ordering {
    match (lhs, rhs) {
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => l
            .as_f64()
            .partial_cmp(&r.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        _ => Ordering::Equal,
    }
}

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Which slice of a result set the caller wants; `page` is zero-based
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PageRequest {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    pub size: usize,
}

impl PageRequest {
    pub fn new(page: usize, size: usize) -> PageRequest {
        PageRequest { page, size }.clamped()
    }
    /// Coerce `size` into [1, MAX_PAGE_SIZE]
    pub fn clamped(self) -> PageRequest {
        PageRequest {
            page: self.page,
            size: self.size.clamp(1, MAX_PAGE_SIZE),
        }
    }
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        PageRequest {
            page: 0,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// One page of a result set, along with the size of the entire result set
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    pub fn empty(req: &PageRequest) -> Page<T> {
        Page {
            items: Vec::new(),
            total: 0,
            page: req.page,
            size: req.size,
        }
    }
    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            size: self.size,
        }
    }
    pub fn try_map<U, E, F>(self, f: F) -> std::result::Result<Page<U>, E>
    where
        F: FnMut(T) -> std::result::Result<U, E>,
    {
        Ok(Page {
            items: self
                .items
                .into_iter()
                .map(f)
                .collect::<std::result::Result<Vec<U>, E>>()?,
            total: self.total,
            page: self.page,
            size: self.size,
        })
    }
}

/// Filter, order & window a collection of documents in-process
///
/// Backends that can't push a [Predicate] down to the database (or don't bother) use this.
pub fn apply_query(
    docs: impl IntoIterator<Item = Document>,
    predicate: &Predicate,
    sort: &Sort,
    req: &PageRequest,
) -> Page<Document> {
    let mut matching: Vec<Document> = docs
        .into_iter()
        .filter(|doc| predicate.matches(doc))
        .collect();
    matching.sort_by(|l, r| sort.compare(l, r));
    let total = matching.len();
    Page {
        items: matching
            .into_iter()
            .skip(req.offset())
            .take(req.size)
            .collect(),
        total,
        page: req.page,
        size: req.size,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                            Backend                                             //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[async_trait]
pub trait Backend {
    /// Retrieve a document by id; `None` means there is no such document
    async fn get(&self, kind: Kind, id: &str) -> Result<Option<Document>>;
    /// Write a document, insisting that the stored version be `expected` (`None` meaning "there
    /// is no such document, yet"). Return the document as stored, with its new version.
    async fn put(
        &self,
        kind: Kind,
        id: &str,
        doc: Document,
        expected: Option<u64>,
    ) -> Result<Document>;
    /// Remove a document; fails with [Error::NotFound] if there is no such document
    async fn delete(&self, kind: Kind, id: &str) -> Result<()>;
    /// Retrieve one page of the documents of kind `kind` matching `predicate`, in the order given
    /// by `sort`
    async fn query(
        &self,
        kind: Kind,
        predicate: &Predicate,
        sort: &Sort,
        page: &PageRequest,
    ) -> Result<Page<Document>>;
}

/// Compute the version a document will carry after a successful write
pub fn next_version(expected: Option<u64>) -> u64 {
    expected.unwrap_or(0) + 1
}

/// Read the version attribute off a stored document
pub fn version_of(doc: &Document) -> Option<u64> {
    doc.get("version").and_then(Value::as_u64)
}

/// Stamp a document with its id & new version, prior to storing it
pub fn stamp(mut doc: Document, id: &str, expected: Option<u64>) -> Document {
    doc.insert("id".to_owned(), Value::String(id.to_owned()));
    doc.insert("version".to_owned(), Value::from(next_version(expected)));
    doc
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                         typed records                                          //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A type that can be kept in the store
///
/// `version()` is zero for a record that has never been written.
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: Kind;
    type Id: Display + Send + Sync;
    fn id(&self) -> Self::Id;
    fn version(&self) -> u64;
}

fn to_document<T: Record>(record: &T) -> Result<Document> {
    match serde_json::to_value(record).context(SerSnafu { kind: T::KIND })? {
        Value::Object(map) => Ok(map),
        _ => NotAnObjectSnafu { kind: T::KIND }.fail(),
    }
}

fn from_document<T: Record>(doc: Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc)).context(DeSnafu { kind: T::KIND })
}

/// Look-up a record by id; `None` means no such record
pub async fn get<T: Record>(storage: &(dyn Backend + Send + Sync), id: &T::Id) -> Result<Option<T>> {
    storage
        .get(T::KIND, &id.to_string())
        .await?
        .map(from_document)
        .transpose()
}

/// Look-up a record by id, failing with [Error::NotFound] if it isn't there
pub async fn fetch<T: Record>(storage: &(dyn Backend + Send + Sync), id: &T::Id) -> Result<T> {
    get::<T>(storage, id).await?.context(NotFoundSnafu {
        kind: T::KIND,
        id: id.to_string(),
    })
}

/// Write a record; the write is conditional on the stored version matching `record.version()`
pub async fn put<T: Record>(storage: &(dyn Backend + Send + Sync), record: &T) -> Result<T> {
    let expected = match record.version() {
        0 => None,
        n => Some(n),
    };
    let mut doc = to_document(record)?;
    doc.insert(
        "updated_at".to_owned(),
        Value::String(timestamp_string(&Utc::now())),
    );
    from_document(
        storage
            .put(T::KIND, &record.id().to_string(), doc, expected)
            .await?,
    )
}

pub async fn delete<T: Record>(storage: &(dyn Backend + Send + Sync), id: &T::Id) -> Result<()> {
    storage.delete(T::KIND, &id.to_string()).await
}

pub async fn query<T: Record>(
    storage: &(dyn Backend + Send + Sync),
    predicate: &Predicate,
    sort: &Sort,
    page: &PageRequest,
) -> Result<Page<T>> {
    storage
        .query(T::KIND, predicate, sort, page)
        .await?
        .try_map(from_document)
}

/// Retrieve *every* record matching `predicate`, walking the result set a page at a time
pub async fn query_all<T: Record>(
    storage: &(dyn Backend + Send + Sync),
    predicate: &Predicate,
) -> Result<Vec<T>> {
    let mut req = PageRequest::new(0, MAX_PAGE_SIZE);
    let mut out = Vec::new();
    loop {
        let page = query::<T>(storage, predicate, &Sort::ascending("id"), &req).await?;
        let n = page.items.len();
        out.extend(page.items);
        if n < req.size || out.len() >= page.total {
            break;
        }
        req.page += 1;
    }
    Ok(out)
}

#[cfg(test)]
mod predicate_tests {
    use super::*;

    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn text_matching_ignores_case() {
        let d = doc(json!({"id": "1", "title": "Learning Rust the Hard Way"}));
        assert!(Predicate::text("title", "rust").matches(&d));
        assert!(Predicate::text("title", "HARD").matches(&d));
        assert!(!Predicate::text("title", "python").matches(&d));
        assert!(!Predicate::text("content", "rust").matches(&d));
    }

    #[test]
    fn set_membership() {
        let d = doc(json!({"id": "1", "author": "a", "likes": ["x", "y"]}));
        assert!(Predicate::contains("likes", "x").matches(&d));
        assert!(!Predicate::contains("likes", "z").matches(&d));
        assert!(Predicate::any_of("author", ["b", "a"]).matches(&d));
        assert!(!Predicate::any_of("author", Vec::<String>::new()).matches(&d));
    }

    #[test]
    fn ranges_and_combinators() {
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::hours(1);
        let d = doc(json!({"id": "1", "deadline": timestamp_string(&t1), "done": false}));
        assert!(Predicate::after("deadline", t0).matches(&d));
        assert!(!Predicate::after("deadline", t1).matches(&d));
        assert!(Predicate::And(vec![
            Predicate::after("deadline", t0),
            Predicate::eq("done", false)
        ])
        .matches(&d));
        assert!(Predicate::Or(vec![
            Predicate::eq("done", true),
            Predicate::eq("id", "1")
        ])
        .matches(&d));
        assert!(!Predicate::after("missing", t0).matches(&d));
        let d = doc(json!({"id": "2", "goal": 3}));
        assert!(Predicate::Gt("goal", 0).matches(&d));
        assert!(!Predicate::Lt("goal", 3).matches(&d));
    }

    #[test]
    fn short_last_page() {
        let docs = (0..3).map(|i| doc(json!({"id": format!("{i}"), "n": i})));
        let page = apply_query(
            docs,
            &Predicate::All,
            &Sort::descending("n"),
            &PageRequest::new(0, 10),
        );
        assert_eq!(3, page.total);
        assert_eq!(3, page.items.len());
        assert_eq!(Some(&json!(2)), page.items[0].get("n"));
    }

    #[test]
    fn timestamps_sort_lexicographically() {
        let t0 = DateTime::parse_from_rfc3339("2025-03-01T12:00:00Z")
            .unwrap(/* known good */)
            .with_timezone(&Utc);
        let t1 = t0 + chrono::Duration::milliseconds(500);
        assert!(timestamp_string(&t0) < timestamp_string(&t1));
    }
}
