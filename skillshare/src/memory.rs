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

//! # memory
//!
//! An in-process [Backend] implementation. Nothing is persisted; this is for tests & for running
//! the daemon without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use snafu::prelude::*;
use tokio::sync::RwLock;
use tracing::debug;

use crate::storage::{
    apply_query, stamp, version_of, Backend, ConflictSnafu, Document, Kind, NotFoundSnafu, Page,
    PageRequest, Predicate, Result, Sort,
};

/// Documents held in memory, one map per [Kind]
///
/// The version check & the write happen under the same write lock, giving each `put` the
/// record-level atomicity the other backends get from their databases.
#[derive(Debug, Default)]
pub struct Client {
    collections: RwLock<HashMap<Kind, HashMap<String, Document>>>,
}

impl Client {
    pub fn new() -> Client {
        Client::default()
    }
}

#[async_trait]
impl Backend for Client {
    async fn get(&self, kind: Kind, id: &str) -> Result<Option<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(&kind)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn put(
        &self,
        kind: Kind,
        id: &str,
        doc: Document,
        expected: Option<u64>,
    ) -> Result<Document> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(kind).or_default();
        let current = collection.get(id).and_then(version_of);
        ensure!(
            current == expected,
            ConflictSnafu {
                kind,
                id: id.to_owned(),
                expected,
            }
        );
        let doc = stamp(doc, id, expected);
        debug!("memory: writing {} {} at version {:?}", kind, id, version_of(&doc));
        collection.insert(id.to_owned(), doc.clone());
        Ok(doc)
    }

    async fn delete(&self, kind: Kind, id: &str) -> Result<()> {
        self.collections
            .write()
            .await
            .get_mut(&kind)
            .and_then(|c| c.remove(id))
            .map(|_| ())
            .context(NotFoundSnafu {
                kind,
                id: id.to_owned(),
            })
    }

    async fn query(
        &self,
        kind: Kind,
        predicate: &Predicate,
        sort: &Sort,
        page: &PageRequest,
    ) -> Result<Page<Document>> {
        let docs: Vec<Document> = self
            .collections
            .read()
            .await
            .get(&kind)
            .map(|c| c.values().cloned().collect())
            .unwrap_or_default();
        Ok(apply_query(docs, predicate, sort, page))
    }
}

#[cfg(test)]
mod memory_tests {
    use super::*;

    use serde_json::{json, Value};

    use crate::storage::Error;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn versioned_writes() {
        let client = Client::new();
        let stored = client
            .put(Kind::Post, "p1", doc(json!({"title": "a"})), None)
            .await
            .unwrap();
        assert_eq!(Some(1), version_of(&stored));
        // A second insert is stale
        assert!(matches!(
            client
                .put(Kind::Post, "p1", doc(json!({"title": "b"})), None)
                .await,
            Err(Error::Conflict { .. })
        ));
        let stored = client
            .put(Kind::Post, "p1", doc(json!({"title": "b"})), Some(1))
            .await
            .unwrap();
        assert_eq!(Some(2), version_of(&stored));
        // Writing against version one again is stale, too
        assert!(client
            .put(Kind::Post, "p1", doc(json!({"title": "c"})), Some(1))
            .await
            .is_err());
        assert_eq!(
            Some(&json!("b")),
            client
                .get(Kind::Post, "p1")
                .await
                .unwrap()
                .unwrap()
                .get("title")
        );
    }

    #[tokio::test]
    async fn deletes() {
        let client = Client::new();
        client
            .put(Kind::Comment, "c1", doc(json!({})), None)
            .await
            .unwrap();
        assert!(client.get(Kind::Post, "c1").await.unwrap().is_none());
        client.delete(Kind::Comment, "c1").await.unwrap();
        assert!(matches!(
            client.delete(Kind::Comment, "c1").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn pagination_boundary() {
        let client = Client::new();
        for i in 0..3 {
            client
                .put(Kind::Post, &format!("p{i}"), doc(json!({"n": i})), None)
                .await
                .unwrap();
        }
        let page = client
            .query(
                Kind::Post,
                &Predicate::All,
                &Sort::ascending("n"),
                &PageRequest::new(0, 5),
            )
            .await
            .unwrap();
        assert_eq!(3, page.items.len());
        assert_eq!(3, page.total);
        let page = client
            .query(
                Kind::Post,
                &Predicate::All,
                &Sort::ascending("n"),
                &PageRequest::new(1, 2),
            )
            .await
            .unwrap();
        assert_eq!(1, page.items.len());
        assert_eq!(3, page.total);
        assert_eq!(Some(&json!(2)), page.items[0].get("n"));
    }
}
