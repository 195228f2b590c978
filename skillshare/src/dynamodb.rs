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

//! # dynamodb
//!
//! [Backend] implementation for DynamoDB.
//!
//! Each [Kind] lives in its own table (named by [Kind::collection]) with a string hash key named
//! `id`; the tables are expected to exist already. Versioned writes are conditional puts.
//!
//! DynamoDB can't express most of our [Predicate]s as key conditions, so queries scan the table
//! & filter, order & window in-process via [apply_query]. That's fine at the scale this backend is
//! meant for; a busier deployment should use [mongo](crate::mongo).

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{meta::region::RegionProviderChain, BehaviorVersion, Region};
use aws_sdk_dynamodb::{config::Credentials, types::AttributeValue};
use either::Either;
use secrecy::SecretString;
use serde_dynamo::aws_sdk_dynamodb_1::{from_item, from_items, to_item};
use snafu::{Backtrace, Snafu};
use tracing::debug;
use url::Url;

use crate::storage::{
    self, apply_query, stamp, Backend, ConflictSnafu, Document, Kind, NotFoundSnafu, Page,
    PageRequest, Predicate, Sort,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("No endpoint URLs specified"))]
    NoEndpoints { backtrace: Backtrace },
}

type Result<T> = std::result::Result<T, Error>;

type Item = HashMap<String, AttributeValue>;

/// Where to find DynamoDB: an AWS region (`Left`) or explicit endpoints (`Right`)
///
/// In TOML, `location = { Left = "us-west-2" }` or `location = { Right = ["http://localhost:8000"] }`.
pub type Location = Either<String, Vec<Url>>;

pub struct Client {
    client: ::aws_sdk_dynamodb::Client,
}

impl Client {
    /// Build a client for `location`; given endpoints, only the first is used
    pub async fn new(
        location: &Location,
        credentials: &Option<(SecretString, SecretString)>,
    ) -> Result<Client> {
        use secrecy::ExposeSecret;
        let creds = credentials.as_ref().map(|(id, secret)| {
            Credentials::new(
                id.expose_secret(),
                secret.expose_secret(),
                None,
                None,
                "skillshare",
            )
        });

        let config = match location {
            Either::Left(region) => {
                let region_provider =
                    RegionProviderChain::first_try(Some(Region::new(region.clone())))
                        .or_default_provider()
                        .or_else(Region::new("us-west-2"));
                let mut loader = aws_config::from_env().region(region_provider);
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
            Either::Right(endpoints) => {
                let ep_url = endpoints.first().ok_or(NoEndpointsSnafu {}.build())?;
                let mut loader =
                    aws_config::defaults(BehaviorVersion::latest()).endpoint_url(ep_url.as_str());
                if let Some(creds) = creds {
                    loader = loader.credentials_provider(creds);
                }
                loader.load().await
            }
        };
        Ok(Client {
            client: ::aws_sdk_dynamodb::Client::new(&config),
        })
    }
}

/// The condition under which a write expecting `expected` may proceed, along with the value to be
/// bound to `:v`, if any
fn write_condition(expected: Option<u64>) -> (&'static str, Option<AttributeValue>) {
    match expected {
        None => ("attribute_not_exists(id)", None),
        Some(v) => ("version = :v", Some(AttributeValue::N(v.to_string()))),
    }
}

#[async_trait]
impl Backend for Client {
    async fn get(&self, kind: Kind, id: &str) -> storage::Result<Option<Document>> {
        self.client
            .get_item()
            .table_name(kind.collection())
            .key("id", AttributeValue::S(id.to_owned()))
            .consistent_read(true)
            .send()
            .await
            .map_err(storage::Error::new)?
            .item
            .map(|item| from_item::<Document>(item).map_err(storage::Error::new))
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
        let item: Item = to_item(&doc).map_err(storage::Error::new)?;
        let (condition, value) = write_condition(expected);
        let mut builder = self
            .client
            .put_item()
            .table_name(kind.collection())
            .set_item(Some(item))
            .condition_expression(condition);
        if let Some(value) = value {
            builder = builder.expression_attribute_values(":v", value);
        }

        use aws_sdk_dynamodb::{
            error::SdkError, operation::put_item::PutItemError::ConditionalCheckFailedException,
        };
        match builder.send().await {
            Ok(_) => {
                debug!("dynamodb: wrote {} {}", kind, id);
                Ok(doc)
            }
            // A failed condition means someone else wrote first
            Err(err)
                if matches!(err, SdkError::ServiceError(ref inner) if matches!(inner.err(), ConditionalCheckFailedException(_))) =>
            {
                ConflictSnafu {
                    kind,
                    id: id.to_owned(),
                    expected,
                }
                .fail()
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn delete(&self, kind: Kind, id: &str) -> storage::Result<()> {
        use aws_sdk_dynamodb::{
            error::SdkError, operation::delete_item::DeleteItemError::ConditionalCheckFailedException,
        };
        match self
            .client
            .delete_item()
            .table_name(kind.collection())
            .key("id", AttributeValue::S(id.to_owned()))
            .condition_expression("attribute_exists(id)")
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err)
                if matches!(err, SdkError::ServiceError(ref inner) if matches!(inner.err(), ConditionalCheckFailedException(_))) =>
            {
                NotFoundSnafu {
                    kind,
                    id: id.to_owned(),
                }
                .fail()
            }
            Err(err) => Err(storage::Error::new(err)),
        }
    }

    async fn query(
        &self,
        kind: Kind,
        predicate: &Predicate,
        sort: &Sort,
        page: &PageRequest,
    ) -> storage::Result<Page<Document>> {
        let mut docs: Vec<Document> = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            let output = self
                .client
                .scan()
                .table_name(kind.collection())
                .set_exclusive_start_key(start.take())
                .send()
                .await
                .map_err(storage::Error::new)?;
            if let Some(items) = output.items {
                docs.extend(from_items::<Document>(items).map_err(storage::Error::new)?);
            }
            match output.last_evaluated_key {
                Some(key) if !key.is_empty() => start = Some(key),
                _ => break,
            }
        }
        debug!("dynamodb: scanned {} {} records", docs.len(), kind);
        Ok(apply_query(docs, predicate, sort, page))
    }
}

#[cfg(test)]
mod dynamodb_tests {
    use super::*;

    use serde_json::{json, Value};

    #[test]
    fn conditions() {
        assert_eq!(("attribute_not_exists(id)", None), write_condition(None));
        assert_eq!(
            ("version = :v", Some(AttributeValue::N("7".to_owned()))),
            write_condition(Some(7))
        );
    }

    #[test]
    fn documents_survive_the_trip_through_items() {
        let doc = match json!({
            "id": "p1",
            "title": "Pottery",
            "likes": ["u1", "u2"],
            "video_url": null,
            "commitment_goal": 3,
            "version": 2,
        }) {
            Value::Object(m) => m,
            _ => unreachable!(),
        };
        let item: Item = to_item(&doc).unwrap();
        assert_eq!(Some(&AttributeValue::S("Pottery".to_owned())), item.get("title"));
        let back = from_item::<Document>(item).unwrap();
        assert_eq!(doc, back);
    }
}
