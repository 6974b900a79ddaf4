// Copyright 2026 Element Creations Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

//! A module containing the PostgreSQL implementation of the
//! [`RecordRepository`]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{DeleteStatement, Expr, Order, PostgresQueryBuilder, Query, SelectStatement};
use sea_query_binder::SqlxBinder;
use sqlx::PgConnection;
use sweeper_data_model::{Collection, Record, RetentionPredicate};
use sweeper_storage::RecordRepository;
use ulid::Ulid;
use uuid::Uuid;

use crate::{
    DatabaseError, DatabaseInconsistencyError,
    filter::StatementExt,
    iden::{Collections, table},
    tracing::ExecuteExt,
};

/// An implementation of [`RecordRepository`] for a PostgreSQL connection
pub struct PgRecordRepository<'c> {
    conn: &'c mut PgConnection,
}

impl<'c> PgRecordRepository<'c> {
    /// Create a new [`PgRecordRepository`] from an active PostgreSQL
    /// connection
    pub fn new(conn: &'c mut PgConnection) -> Self {
        Self { conn }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct RecordLookup {
    id: Uuid,
    kind: String,
    ts: DateTime<Utc>,
}

impl From<RecordLookup> for Record {
    fn from(value: RecordLookup) -> Self {
        Record {
            id: value.id.into(),
            kind: value.kind,
            ts: value.ts,
        }
    }
}

fn find_query(
    collection: Collection,
    predicate: &RetentionPredicate,
    limit: u64,
) -> SelectStatement {
    Query::select()
        .columns([Collections::Id, Collections::Kind, Collections::Ts])
        .from(table(collection))
        .apply_filter(predicate)
        .order_by(Collections::Id, Order::Asc)
        .limit(limit)
        .to_owned()
}

fn delete_query(collection: Collection, ids: &[Ulid]) -> DeleteStatement {
    Query::delete()
        .from_table(table(collection))
        .and_where(Expr::col(Collections::Id).is_in(ids.iter().copied().map(Uuid::from)))
        .to_owned()
}

fn count_query(collection: Collection, predicate: &RetentionPredicate) -> SelectStatement {
    Query::select()
        .expr(Expr::col(Collections::Id).count())
        .from(table(collection))
        .apply_filter(predicate)
        .to_owned()
}

#[async_trait]
impl RecordRepository for PgRecordRepository<'_> {
    type Error = DatabaseError;

    #[tracing::instrument(
        name = "db.record.find",
        skip_all,
        fields(
            db.query.text,
            db.collection.name = %collection,
            record.kind = predicate.kind(),
            limit = limit,
        ),
        err,
    )]
    async fn find(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
        limit: usize,
    ) -> Result<Vec<Record>, Self::Error> {
        let limit = u64::try_from(limit).map_err(DatabaseError::to_invalid_operation)?;
        let (sql, arguments) =
            find_query(collection, predicate, limit).build_sqlx(PostgresQueryBuilder);

        let rows: Vec<RecordLookup> = sqlx::query_as_with(&sql, arguments)
            .traced()
            .fetch_all(&mut *self.conn)
            .await?;

        let records: Vec<Record> = rows.into_iter().map(Record::from).collect();

        // Never hand out a record the predicate does not cover, as it would get
        // deleted
        if let Some(record) = records.iter().find(|r| !predicate.matches(r)) {
            return Err(DatabaseInconsistencyError::on(collection.as_str())
                .column("ts")
                .row(record.id)
                .into());
        }

        Ok(records)
    }

    #[tracing::instrument(
        name = "db.record.delete_by_ids",
        skip_all,
        fields(
            db.query.text,
            db.collection.name = %collection,
            count = ids.len(),
        ),
        err,
    )]
    async fn delete_by_ids(
        &mut self,
        collection: Collection,
        ids: &[Ulid],
    ) -> Result<usize, Self::Error> {
        if ids.is_empty() {
            return Ok(0);
        }

        let (sql, arguments) = delete_query(collection, ids).build_sqlx(PostgresQueryBuilder);

        let res = sqlx::query_with(&sql, arguments)
            .traced()
            .execute(&mut *self.conn)
            .await?;

        res.rows_affected().try_into().map_err(|e| {
            DatabaseInconsistencyError::on(collection.as_str())
                .source(e)
                .into()
        })
    }

    #[tracing::instrument(
        name = "db.record.count",
        skip_all,
        fields(
            db.query.text,
            db.collection.name = %collection,
            record.kind = predicate.kind(),
        ),
        err,
    )]
    async fn count(
        &mut self,
        collection: Collection,
        predicate: &RetentionPredicate,
    ) -> Result<usize, Self::Error> {
        let (sql, arguments) = count_query(collection, predicate).build_sqlx(PostgresQueryBuilder);

        let count: i64 = sqlx::query_scalar_with(&sql, arguments)
            .traced()
            .fetch_one(&mut *self.conn)
            .await?;

        count
            .try_into()
            .map_err(DatabaseError::to_invalid_operation)
    }
}
