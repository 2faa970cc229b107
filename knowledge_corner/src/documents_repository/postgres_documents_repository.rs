use anyhow::Context;
use serde_json::Value;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};

use crate::api::{DeleteResult, Document, DocumentId, InsertOneResult, UpdateResult, ID_FIELD};
use crate::documents_repository::DocumentsRepositoryError::Other;
use crate::documents_repository::{
    Collection, Condition, DocumentsRepository, DocumentsRepositoryError, Filter, Update,
};

pub struct PostgresDocumentsRepository {
    client: Client,
}

#[derive(Debug, Clone)]
pub struct PostgresDocumentsRepositoryConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
    pub database: String,
}

fn table_name(collection: Collection) -> &'static str {
    match collection {
        Collection::LibraryUsers => "library_users",
        Collection::AllBooks => "all_books",
        Collection::BorrowedBooks => "borrowed_books",
    }
}

/// Positional parameters collected while a statement is being built
#[derive(Default)]
struct QueryParams {
    values: Vec<Box<dyn ToSql + Sync + Send>>,
}

impl QueryParams {
    /// Stores the value and returns its placeholder
    fn push(&mut self, value: impl ToSql + Sync + Send + 'static) -> String {
        self.values.push(Box::new(value));
        format!("${}", self.values.len())
    }

    fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.values
            .iter()
            .map(|value| value.as_ref() as &(dyn ToSql + Sync))
            .collect()
    }
}

fn where_clause(filter: &Filter, params: &mut QueryParams) -> String {
    if filter.conditions().is_empty() {
        return "TRUE".to_string();
    }
    filter
        .conditions()
        .iter()
        .map(|condition| match condition {
            Condition::Equals {
                field,
                value: Value::Null,
            } => {
                let field = params.push(field.clone());
                format!("(params -> {field}::TEXT IS NULL OR params -> {field}::TEXT = 'null'::JSONB)")
            }
            Condition::Equals { field, value } => {
                let field = params.push(field.clone());
                let value = params.push(value.clone());
                format!("(params -> {field}::TEXT = {value}::JSONB)")
            }
            Condition::GreaterThan { field, threshold } => {
                let field = params.push(field.clone());
                let threshold = params.push(*threshold);
                format!(
                    "(CASE WHEN jsonb_typeof(params -> {field}::TEXT) = 'number' \
                     THEN (params ->> {field}::TEXT)::NUMERIC > {threshold}::FLOAT8 \
                     ELSE FALSE END)"
                )
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn update_expression(update: &Update, params: &mut QueryParams) -> String {
    match update {
        Update::Increment { field, by } => {
            let field = params.push(field.clone());
            let by = params.push(*by);
            // casting the raw jsonb text fails for null and strings, like the in-memory store
            format!(
                "jsonb_set(params, ARRAY[{field}::TEXT], to_jsonb(\
                 (CASE WHEN params ? {field}::TEXT THEN (params -> {field}::TEXT)::TEXT::NUMERIC ELSE 0 END) \
                 + {by}::BIGINT))"
            )
        }
        Update::Set(fields) => {
            let mut fields = fields.clone();
            fields.remove(ID_FIELD);
            let fields = params.push(Value::Object(fields));
            format!("params || {fields}::JSONB")
        }
    }
}

fn document_from_row(row: &Row) -> Result<Document, DocumentsRepositoryError> {
    let id: DocumentId = row.try_get(0)?;
    let params: Value = row.try_get(1)?;
    match params {
        Value::Object(mut document) => {
            document.insert(ID_FIELD.to_string(), Value::from(id));
            Ok(document)
        }
        _ => Err(Other(format!("Document {} is not an object", id))),
    }
}

impl PostgresDocumentsRepository {
    pub async fn init(config: PostgresDocumentsRepositoryConfig) -> anyhow::Result<Self> {
        let connection_str = format!(
            "postgresql://{}:{}@{}/{}",
            config.username, config.password, config.hostname, config.database
        );
        tracing::info!(
            "Postgres connecting to {} as {}, database {}",
            config.hostname,
            config.username,
            config.database
        );
        let (client, connection) = tokio_postgres::connect(&connection_str, NoTls)
            .await
            .context("Failed to start postgres")?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!("Postgres connection error: {}", e);
            }
        });

        for collection in Collection::ALL {
            client
                .batch_execute(&format!(
                    "
        CREATE TABLE IF NOT EXISTS {} (
            id              SERIAL PRIMARY KEY,
            params          JSONB NOT NULL
            )
        ",
                    table_name(collection)
                ))
                .await
                .with_context(|| format!("Failed to setup {} table", collection.name()))?;
        }

        let repository = Self { client };
        repository
            .ping()
            .await
            .context("Failed to ping postgres")?;
        tracing::info!("Pinged postgres, connection established");
        Ok(repository)
    }

    async fn insert(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> Result<DocumentId, DocumentsRepositoryError> {
        document.remove(ID_FIELD);
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "INSERT INTO {} (params) VALUES ($1) RETURNING id",
                table_name(collection)
            ))
            .await?;

        let rows = self
            .client
            .query(&stmt, &[&Value::Object(document)])
            .await?;

        let id: DocumentId = rows
            .first()
            .ok_or_else(|| Other("Id not returned".to_string()))?
            .try_get(0)?;
        Ok(id)
    }

    /// Rewrites the first matching row, returns one flag per matched row telling if it changed
    async fn rewrite_first(
        &self,
        collection: Collection,
        filter: &Filter,
        expression: impl FnOnce(&mut QueryParams) -> String,
    ) -> Result<Vec<bool>, DocumentsRepositoryError> {
        let table = table_name(collection);
        let mut params = QueryParams::default();
        let where_clause = where_clause(filter, &mut params);
        let expression = expression(&mut params);

        let stmt: Statement = self
            .client
            .prepare(&format!(
                "WITH target AS (
                    SELECT id, params AS previous FROM {table}
                    WHERE {where_clause} ORDER BY id LIMIT 1 FOR UPDATE
                )
                UPDATE {table} SET params = {expression}
                FROM target WHERE {table}.id = target.id
                RETURNING {table}.params IS DISTINCT FROM target.previous"
            ))
            .await?;

        let rows = self.client.query(&stmt, &params.as_refs()).await?;
        rows.iter()
            .map(|row| row.try_get::<_, bool>(0).map_err(DocumentsRepositoryError::from))
            .collect()
    }
}

fn update_result(changes: &[bool]) -> UpdateResult {
    UpdateResult {
        acknowledged: true,
        matched_count: changes.len() as u64,
        modified_count: changes.iter().filter(|&&changed| changed).count() as u64,
        ..UpdateResult::default()
    }
}

#[async_trait::async_trait]
impl DocumentsRepository for PostgresDocumentsRepository {
    async fn ping(&self) -> Result<(), DocumentsRepositoryError> {
        self.client.batch_execute("SELECT 1").await?;
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, DocumentsRepositoryError> {
        let mut params = QueryParams::default();
        let where_clause = where_clause(filter, &mut params);
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "SELECT id, params FROM {} WHERE {} ORDER BY id",
                table_name(collection),
                where_clause
            ))
            .await?;

        let rows = self.client.query(&stmt, &params.as_refs()).await?;
        rows.iter().map(document_from_row).collect()
    }

    async fn insert_one(
        &self,
        collection: Collection,
        document: Document,
    ) -> Result<InsertOneResult, DocumentsRepositoryError> {
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: self.insert(collection, document).await?,
        })
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, DocumentsRepositoryError> {
        let changes = self
            .rewrite_first(collection, filter, |params| update_expression(update, params))
            .await?;
        Ok(update_result(&changes))
    }

    async fn replace_one(
        &self,
        collection: Collection,
        filter: &Filter,
        mut replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DocumentsRepositoryError> {
        replacement.remove(ID_FIELD);
        let replacement_value = Value::Object(replacement.clone());
        let changes = self
            .rewrite_first(collection, filter, move |params| {
                format!("{}::JSONB", params.push(replacement_value))
            })
            .await?;

        if changes.is_empty() && upsert {
            let id = self.insert(collection, replacement).await?;
            return Ok(UpdateResult {
                acknowledged: true,
                upserted_count: 1,
                upserted_id: Some(id),
                ..UpdateResult::default()
            });
        }
        Ok(update_result(&changes))
    }

    async fn delete_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<DeleteResult, DocumentsRepositoryError> {
        let table = table_name(collection);
        let mut params = QueryParams::default();
        let where_clause = where_clause(filter, &mut params);
        let stmt: Statement = self
            .client
            .prepare(&format!(
                "DELETE FROM {table} WHERE id = (
                    SELECT id FROM {table} WHERE {where_clause} ORDER BY id LIMIT 1
                ) RETURNING id"
            ))
            .await?;

        let rows = self.client.query(&stmt, &params.as_refs()).await?;
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: rows.len() as u64,
        })
    }
}
