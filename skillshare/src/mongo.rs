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

//! # mongo
//!
//! [Backend] implementation for MongoDB.
//!
//! Each [Kind] gets its own collection. Documents are stored as-is, with `_id` set to the record's
//! id; [Predicate]s & [Sort]s are translated into MongoDB filter & sort documents so that the
//! database does the work.

use async_trait::async_trait;
use bson::{doc, Bson, Document as BsonDocument};
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind as MongoErrorKind, WriteFailure},
    options::IndexOptions,
    Collection, Database, IndexModel,
};
use serde_json::Value;
use snafu::{prelude::*, Backtrace};
use tracing::{debug, info};

use crate::storage::{
    self, stamp, timestamp_string, Backend, ConflictSnafu, Document, Kind, NotFoundSnafu, Order,
    Page, PageRequest, Predicate, Sort,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to connect to MongoDB at {uri}: {source}"))]
    Connect {
        uri: String,
        source: mongodb::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to index collection {collection}: {source}"))]
    Index {
        collection: String,
        source: mongodb::error::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("MongoDB did not answer a ping: {source}"))]
    Ping {
        source: mongodb::error::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

pub struct Client {
    db: Database,
}

impl Client {
    /// Connect to `database` at `uri`; make sure the server's up & that user emails are unique
    pub async fn new(uri: &str, database: &str) -> Result<Client> {
        let client = mongodb::Client::with_uri_str(uri)
            .await
            .context(ConnectSnafu {
                uri: uri.to_owned(),
            })?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await.context(PingSnafu)?;
        db.collection::<BsonDocument>(Kind::User.collection())
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(IndexOptions::builder().unique(true).build())
                    .build(),
            )
            .await
            .context(IndexSnafu {
                collection: Kind::User.collection(),
            })?;
        info!("Connected to MongoDB database {}", database);
        Ok(Client { db })
    }
    fn collection(&self, kind: Kind) -> Collection<BsonDocument> {
        self.db.collection(kind.collection())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(*err.kind, MongoErrorKind::Write(WriteFailure::WriteError(ref inner)) if inner.code == DUPLICATE_KEY)
}

fn to_bson(value: &Value) -> storage::Result<Bson> {
    bson::to_bson(value).map_err(storage::Error::new)
}

fn from_bson_document(mut doc: BsonDocument) -> storage::Result<Document> {
    doc.remove("_id");
    bson::from_document::<Document>(doc).map_err(storage::Error::new)
}

fn single(field: &str, value: impl Into<Bson>) -> BsonDocument {
    let mut doc = BsonDocument::new();
    doc.insert(field, value);
    doc
}

/// Translate a [Predicate] into a MongoDB filter document
fn to_filter(predicate: &Predicate) -> storage::Result<BsonDocument> {
    Ok(match predicate {
        Predicate::All => BsonDocument::new(),
        // Equality against an array field matches any element, so `Contains` is just `Eq`
        Predicate::Eq(field, value) | Predicate::Contains(field, value) => {
            single(field, to_bson(value)?)
        }
        Predicate::In(field, values) => single(
            field,
            doc! { "$in": values.iter().map(to_bson).collect::<storage::Result<Vec<Bson>>>()? },
        ),
        Predicate::ContainsText(field, needle) => single(
            field,
            doc! { "$regex": regex::escape(needle), "$options": "i" },
        ),
        Predicate::Gt(field, n) => single(field, doc! { "$gt": *n }),
        Predicate::Lt(field, n) => single(field, doc! { "$lt": *n }),
        // Timestamps are stored as strings that sort chronologically, and MongoDB only compares
        // strings with strings, so missing or null fields never match
        Predicate::Range {
            field,
            after,
            before,
        } => {
            let mut cond = doc! { "$type": "string" };
            if let Some(after) = after {
                cond.insert("$gt", timestamp_string(after));
            }
            if let Some(before) = before {
                cond.insert("$lt", timestamp_string(before));
            }
            single(field, cond)
        }
        Predicate::And(preds) if preds.is_empty() => BsonDocument::new(),
        Predicate::And(preds) => doc! {
            "$and": preds.iter().map(to_filter).collect::<storage::Result<Vec<BsonDocument>>>()?
        },
        // MongoDB rejects an empty `$or`
        Predicate::Or(preds) if preds.is_empty() => doc! { "_id": { "$in": Bson::Array(vec![]) } },
        Predicate::Or(preds) => doc! {
            "$or": preds.iter().map(to_filter).collect::<storage::Result<Vec<BsonDocument>>>()?
        },
    })
}

fn to_sort(sort: &Sort) -> BsonDocument {
    let mut doc = single(
        sort.field,
        match sort.order {
            Order::Ascending => 1,
            Order::Descending => -1,
        },
    );
    if sort.field != "id" {
        doc.insert("id", 1);
    }
    doc
}

#[async_trait]
impl Backend for Client {
    async fn get(&self, kind: Kind, id: &str) -> storage::Result<Option<Document>> {
        self.collection(kind)
            .find_one(doc! { "_id": id })
            .await
            .map_err(storage::Error::new)?
            .map(from_bson_document)
            .transpose()
    }

    async fn put(
        &self,
        kind: Kind,
        id: &str,
        doc: Document,
        expected: Option<u64>,
    ) -> storage::Result<Document> {
        let doc = stamp(doc, id, expected);
        let mut record = bson::to_document(&doc).map_err(storage::Error::new)?;
        record.insert("_id", id);
        let collection = self.collection(kind);
        let conflict = || {
            ConflictSnafu {
                kind,
                id: id.to_owned(),
                expected,
            }
            .build()
        };
        match expected {
            None => match collection.insert_one(record).await {
                Ok(_) => (),
                Err(err) if is_duplicate_key(&err) => return Err(conflict()),
                Err(err) => return Err(storage::Error::new(err)),
            },
            Some(version) => {
                let result = collection
                    .replace_one(doc! { "_id": id, "version": version as i64 }, record)
                    .await
                    .map_err(|err| {
                        if is_duplicate_key(&err) {
                            conflict()
                        } else {
                            storage::Error::new(err)
                        }
                    })?;
                if result.matched_count != 1 {
                    return Err(conflict());
                }
            }
        }
        debug!("mongo: wrote {} {} at version {:?}", kind, id, expected.map(|v| v + 1));
        Ok(doc)
    }

    async fn delete(&self, kind: Kind, id: &str) -> storage::Result<()> {
        let result = self
            .collection(kind)
            .delete_one(doc! { "_id": id })
            .await
            .map_err(storage::Error::new)?;
        ensure!(
            result.deleted_count == 1,
            NotFoundSnafu {
                kind,
                id: id.to_owned()
            }
        );
        Ok(())
    }

    async fn query(
        &self,
        kind: Kind,
        predicate: &Predicate,
        sort: &Sort,
        page: &PageRequest,
    ) -> storage::Result<Page<Document>> {
        let filter = to_filter(predicate)?;
        let collection = self.collection(kind);
        let total = collection
            .count_documents(filter.clone())
            .await
            .map_err(storage::Error::new)? as usize;
        let items = collection
            .find(filter)
            .sort(to_sort(sort))
            .skip(page.offset() as u64)
            .limit(page.size as i64)
            .await
            .map_err(storage::Error::new)?
            .try_collect::<Vec<BsonDocument>>()
            .await
            .map_err(storage::Error::new)?
            .into_iter()
            .map(from_bson_document)
            .collect::<storage::Result<Vec<Document>>>()?;
        Ok(Page {
            items,
            total,
            page: page.page,
            size: page.size,
        })
    }
}

#[cfg(test)]
mod mongo_tests {
    use super::*;

    use chrono::{DateTime, Utc};
    use serde_json::json;

    #[test]
    fn text_search_is_escaped_and_case_insensitive() {
        assert_eq!(
            doc! { "title": { "$regex": "C\\+\\+", "$options": "i" } },
            to_filter(&Predicate::text("title", "C++")).unwrap()
        );
    }

    #[test]
    fn combinators() {
        let t = DateTime::parse_from_rfc3339("2025-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            doc! {
                "$and": [
                    { "commitment_complete": false },
                    { "commitment_deadline": { "$type": "string", "$gt": "2025-06-01T00:00:00.000000Z" } },
                ]
            },
            to_filter(&Predicate::And(vec![
                Predicate::eq("commitment_complete", false),
                Predicate::after("commitment_deadline", t),
            ]))
            .unwrap()
        );
        assert_eq!(
            doc! { "author": { "$in": ["a", "b"] } },
            to_filter(&Predicate::any_of("author", ["a", "b"])).unwrap()
        );
        assert_eq!(BsonDocument::new(), to_filter(&Predicate::All).unwrap());
        assert_eq!(
            doc! { "_id": { "$in": [] } },
            to_filter(&Predicate::Or(vec![])).unwrap()
        );
    }

    #[test]
    fn sorts_break_ties_on_id() {
        assert_eq!(
            doc! { "created_at": -1, "id": 1 },
            to_sort(&Sort::newest_first())
        );
        assert_eq!(doc! { "id": 1 }, to_sort(&Sort::ascending("id")));
    }

    #[test]
    fn stored_documents_lose_their_mongo_id() {
        let doc = from_bson_document(doc! { "_id": "x", "id": "x", "version": 3_i64 }).unwrap();
        assert_eq!(Some(&json!("x")), doc.get("id"));
        assert_eq!(Some(&json!(3)), doc.get("version"));
        assert!(!doc.contains_key("_id"));
    }
}
