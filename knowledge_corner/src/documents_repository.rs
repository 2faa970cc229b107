pub use in_memory_documents_repository::InMemoryDocumentsRepository;
pub use postgres_documents_repository::{
    PostgresDocumentsRepository, PostgresDocumentsRepositoryConfig,
};

use serde_json::Value;

use crate::api::{DeleteResult, Document, InsertOneResult, UpdateResult};

mod in_memory_documents_repository;
mod postgres_documents_repository;

#[derive(thiserror::Error, Debug)]
pub enum DocumentsRepositoryError {
    #[error("Failed to deserialize document: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("DatabaseFailure failure {0}")]
    DatabaseFailure(#[from] tokio_postgres::Error),

    #[error("Cannot increment non-numeric field {0}")]
    NonNumericField(String),

    #[error("Other error {0}")]
    Other(String),
}

/// Named collections held by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    LibraryUsers,
    AllBooks,
    BorrowedBooks,
}

impl Collection {
    pub const ALL: [Collection; 3] = [
        Collection::LibraryUsers,
        Collection::AllBooks,
        Collection::BorrowedBooks,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Collection::LibraryUsers => "library-users",
            Collection::AllBooks => "all-books",
            Collection::BorrowedBooks => "borrowed-books",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact match. A null value also matches documents missing the field
    Equals { field: String, value: Value },
    /// Numeric field strictly greater than threshold, non-numeric fields never match
    GreaterThan { field: String, threshold: f64 },
}

impl Condition {
    pub fn matches(&self, document: &Document) -> bool {
        match self {
            Condition::Equals { field, value } => match (document.get(field), value) {
                (None | Some(Value::Null), Value::Null) => true,
                (Some(Value::Number(stored)), Value::Number(expected)) => {
                    stored.as_f64() == expected.as_f64()
                }
                (Some(stored), expected) => stored == expected,
                (None, _) => false,
            },
            Condition::GreaterThan { field, threshold } => document
                .get(field)
                .and_then(Value::as_f64)
                .map(|stored| stored > *threshold)
                .unwrap_or_default(),
        }
    }
}

/// Conjunction of conditions, empty filter matches every document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn equals(field: &str, value: impl Into<Value>) -> Self {
        Self {
            conditions: vec![Condition::Equals {
                field: field.to_string(),
                value: value.into(),
            }],
        }
    }

    pub fn greater_than(field: &str, threshold: f64) -> Self {
        Self {
            conditions: vec![Condition::GreaterThan {
                field: field.to_string(),
                threshold,
            }],
        }
    }

    pub fn and(mut self, other: Filter) -> Self {
        self.conditions.extend(other.conditions);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.matches(document))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Adds `by` to a numeric field, a missing field starts from zero
    Increment { field: String, by: i64 },
    /// Overwrites the given top level fields, leaving the others untouched
    Set(Document),
}

#[async_trait::async_trait]
pub trait DocumentsRepository: Send + Sync {
    /// Round trip to the store without touching any collection
    async fn ping(&self) -> Result<(), DocumentsRepositoryError>;
    /// Lists documents matching the filter in insertion order, with `_id` attached
    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, DocumentsRepositoryError>;
    /// Stores the document as is, returns the key assigned to it
    async fn insert_one(
        &self,
        collection: Collection,
        document: Document,
    ) -> Result<InsertOneResult, DocumentsRepositoryError>;
    /// Applies update to the first matching document
    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, DocumentsRepositoryError>;
    /// Replaces the first matching document, inserting the replacement if nothing matched and upsert is set
    async fn replace_one(
        &self,
        collection: Collection,
        filter: &Filter,
        replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DocumentsRepositoryError>;
    /// Removes the first matching document
    async fn delete_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<DeleteResult, DocumentsRepositoryError>;
}
