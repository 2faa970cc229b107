use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::{Number, Value};

use crate::api::{DeleteResult, Document, DocumentId, InsertOneResult, UpdateResult, ID_FIELD};
use crate::documents_repository::{
    Collection, DocumentsRepository, DocumentsRepositoryError, Filter, Update,
};

type StoredDocuments = BTreeMap<DocumentId, Document>;

pub struct InMemoryDocumentsRepository {
    document_sequence_generator: AtomicI32,
    collections: parking_lot::RwLock<HashMap<Collection, StoredDocuments>>,
}

impl Default for InMemoryDocumentsRepository {
    fn default() -> Self {
        Self {
            document_sequence_generator: Default::default(),
            collections: parking_lot::RwLock::new(
                Collection::ALL
                    .into_iter()
                    .map(|collection| (collection, StoredDocuments::new()))
                    .collect(),
            ),
        }
    }
}

impl InMemoryDocumentsRepository {
    fn next_id(&self) -> DocumentId {
        self.document_sequence_generator
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }
}

fn first_match(documents: &StoredDocuments, filter: &Filter) -> Option<DocumentId> {
    documents
        .iter()
        .find(|(_, document)| filter.matches(document))
        .map(|(&id, _)| id)
}

fn increment(
    document: &mut Document,
    field: &str,
    by: i64,
) -> Result<(), DocumentsRepositoryError> {
    let incremented = match document.get(field) {
        None => Value::from(by),
        Some(Value::Number(current)) => match current.as_i64() {
            Some(current) => current
                .checked_add(by)
                .map(Value::from)
                .ok_or_else(|| DocumentsRepositoryError::Other(format!("{field} overflow")))?,
            None => current
                .as_f64()
                .and_then(|current| Number::from_f64(current + by as f64))
                .map(Value::Number)
                .ok_or_else(|| DocumentsRepositoryError::NonNumericField(field.to_string()))?,
        },
        Some(_) => return Err(DocumentsRepositoryError::NonNumericField(field.to_string())),
    };
    document.insert(field.to_string(), incremented);
    Ok(())
}

/// Applies update in place, returns whether the document changed
fn apply_update(document: &mut Document, update: &Update) -> Result<bool, DocumentsRepositoryError> {
    match update {
        Update::Increment { field, by } => {
            increment(document, field, *by)?;
            Ok(*by != 0)
        }
        Update::Set(fields) => {
            let mut result_document = Value::Object(document.clone());
            let mut patch = fields.clone();
            patch.remove(ID_FIELD);
            // merge patch treats null as removal, fields set to null are kept instead
            let nulls: Vec<String> = patch
                .iter()
                .filter(|(_, value)| value.is_null())
                .map(|(key, _)| key.clone())
                .collect();
            json_patch::merge(&mut result_document, &Value::Object(patch));
            let Value::Object(mut result_document) = result_document else {
                return Err(DocumentsRepositoryError::Other(
                    "Document is not an object".to_string(),
                ));
            };
            for key in nulls {
                result_document.insert(key, Value::Null);
            }
            let modified = result_document != *document;
            *document = result_document;
            Ok(modified)
        }
    }
}

fn with_id(id: DocumentId, document: &Document) -> Document {
    let mut result = document.clone();
    result.insert(ID_FIELD.to_string(), Value::from(id));
    result
}

#[async_trait::async_trait]
impl DocumentsRepository for InMemoryDocumentsRepository {
    async fn ping(&self) -> Result<(), DocumentsRepositoryError> {
        Ok(())
    }

    async fn find(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<Vec<Document>, DocumentsRepositoryError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .map(|documents| {
                documents
                    .iter()
                    .filter(|(_, document)| filter.matches(document))
                    .map(|(&id, document)| with_id(id, document))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert_one(
        &self,
        collection: Collection,
        mut document: Document,
    ) -> Result<InsertOneResult, DocumentsRepositoryError> {
        document.remove(ID_FIELD);
        let id = self.next_id();
        self.collections
            .write()
            .entry(collection)
            .or_default()
            .insert(id, document);
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: id,
        })
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: &Filter,
        update: &Update,
    ) -> Result<UpdateResult, DocumentsRepositoryError> {
        let mut locked_collections = self.collections.write();
        let documents = locked_collections.entry(collection).or_default();

        let Some(id) = first_match(documents, filter) else {
            return Ok(UpdateResult {
                acknowledged: true,
                ..UpdateResult::default()
            });
        };

        let mut updated = documents[&id].clone();
        let modified = apply_update(&mut updated, update)?;
        documents.insert(id, updated);

        Ok(UpdateResult {
            acknowledged: true,
            matched_count: 1,
            modified_count: modified as u64,
            ..UpdateResult::default()
        })
    }

    async fn replace_one(
        &self,
        collection: Collection,
        filter: &Filter,
        mut replacement: Document,
        upsert: bool,
    ) -> Result<UpdateResult, DocumentsRepositoryError> {
        replacement.remove(ID_FIELD);
        let mut locked_collections = self.collections.write();
        let documents = locked_collections.entry(collection).or_default();

        match first_match(documents, filter) {
            Some(id) => {
                let modified = documents.insert(id, replacement.clone()) != Some(replacement);
                Ok(UpdateResult {
                    acknowledged: true,
                    matched_count: 1,
                    modified_count: modified as u64,
                    ..UpdateResult::default()
                })
            }
            None if upsert => {
                let id = self.next_id();
                documents.insert(id, replacement);
                Ok(UpdateResult {
                    acknowledged: true,
                    upserted_count: 1,
                    upserted_id: Some(id),
                    ..UpdateResult::default()
                })
            }
            None => Ok(UpdateResult {
                acknowledged: true,
                ..UpdateResult::default()
            }),
        }
    }

    async fn delete_one(
        &self,
        collection: Collection,
        filter: &Filter,
    ) -> Result<DeleteResult, DocumentsRepositoryError> {
        let mut locked_collections = self.collections.write();
        let documents = locked_collections.entry(collection).or_default();

        let deleted_count = first_match(documents, filter)
            .and_then(|id| documents.remove(&id))
            .map(|_| 1)
            .unwrap_or_default();

        Ok(DeleteResult {
            acknowledged: true,
            deleted_count,
        })
    }
}

#[cfg(test)]
mod in_memory_documents_repository_tests {
    use serde_json::json;

    use super::*;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn without_id(mut document: Document) -> Document {
        document.remove(ID_FIELD);
        document
    }

    #[tokio::test]
    /// Tests insert and find on a single collection
    /// 1. Find on empty collection returns nothing
    /// 2. Inserts two books
    /// 3. Find without filter returns both in insertion order with ids attached
    /// 4. Other collections stay empty
    async fn test_insert_and_find() {
        let repo = InMemoryDocumentsRepository::default();
        assert_eq!(
            repo.find(Collection::AllBooks, &Filter::all()).await.unwrap(),
            Vec::<Document>::new()
        );

        let first = repo
            .insert_one(Collection::AllBooks, document(json!({"book_name": "Dune"})))
            .await
            .unwrap();
        let second = repo
            .insert_one(Collection::AllBooks, document(json!({"book_name": "Emma"})))
            .await
            .unwrap();
        assert!(first.acknowledged);
        assert_ne!(first.inserted_id, second.inserted_id);

        let books = repo.find(Collection::AllBooks, &Filter::all()).await.unwrap();
        assert_eq!(
            books,
            vec![
                document(json!({"_id": first.inserted_id, "book_name": "Dune"})),
                document(json!({"_id": second.inserted_id, "book_name": "Emma"})),
            ]
        );

        assert!(repo
            .find(Collection::BorrowedBooks, &Filter::all())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    /// Tests increments on the first matching document
    /// 1. Increment on missing book matches nothing
    /// 2. Decrement below zero is not clamped
    /// 3. Increment of a missing field starts from zero
    /// 4. Increment of a string field fails
    async fn test_increment() {
        let repo = InMemoryDocumentsRepository::default();
        let decrement = Update::Increment {
            field: "book_quantity".to_string(),
            by: -1,
        };

        let result = repo
            .update_one(Collection::AllBooks, &Filter::equals("book_name", "Dune"), &decrement)
            .await
            .unwrap();
        assert_eq!(result.matched_count, 0);
        assert_eq!(result.modified_count, 0);

        repo.insert_one(
            Collection::AllBooks,
            document(json!({"book_name": "Dune", "book_quantity": 1})),
        )
        .await
        .unwrap();
        for _ in 0..2 {
            let result = repo
                .update_one(Collection::AllBooks, &Filter::equals("book_name", "Dune"), &decrement)
                .await
                .unwrap();
            assert_eq!(result.matched_count, 1);
            assert_eq!(result.modified_count, 1);
        }
        let books = repo.find(Collection::AllBooks, &Filter::all()).await.unwrap();
        assert_eq!(books[0]["book_quantity"], json!(-1));

        repo.insert_one(Collection::AllBooks, document(json!({"book_name": "Emma"})))
            .await
            .unwrap();
        repo.update_one(
            Collection::AllBooks,
            &Filter::equals("book_name", "Emma"),
            &Update::Increment {
                field: "book_quantity".to_string(),
                by: 1,
            },
        )
        .await
        .unwrap();
        let emma = repo
            .find(Collection::AllBooks, &Filter::equals("book_name", "Emma"))
            .await
            .unwrap();
        assert_eq!(emma[0]["book_quantity"], json!(1));

        repo.insert_one(
            Collection::AllBooks,
            document(json!({"book_name": "Ulysses", "book_quantity": "many"})),
        )
        .await
        .unwrap();
        let failed = repo
            .update_one(Collection::AllBooks, &Filter::equals("book_name", "Ulysses"), &decrement)
            .await;
        assert!(matches!(
            failed,
            Err(DocumentsRepositoryError::NonNumericField(..))
        ));
    }

    #[tokio::test]
    /// Tests set updates
    /// 1. Set overwrites listed fields and keeps the rest
    /// 2. Null values are written, not removed
    /// 3. Setting identical values reports no modification
    async fn test_set_fields() {
        let repo = InMemoryDocumentsRepository::default();
        repo.insert_one(
            Collection::AllBooks,
            document(json!({"book_name": "Dune", "book_author": "Herbert", "book_quantity": 2})),
        )
        .await
        .unwrap();

        let update = Update::Set(document(json!({"book_name": "Dune Messiah", "book_author": null})));
        let result = repo
            .update_one(Collection::AllBooks, &Filter::equals("book_name", "Dune"), &update)
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);

        let books = repo.find(Collection::AllBooks, &Filter::all()).await.unwrap();
        assert_eq!(
            without_id(books[0].clone()),
            document(json!({"book_name": "Dune Messiah", "book_author": null, "book_quantity": 2}))
        );

        let result = repo
            .update_one(Collection::AllBooks, &Filter::equals("book_name", "Dune Messiah"), &update)
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 0);
    }

    #[tokio::test]
    /// Tests replace with and without upsert
    async fn test_replace_and_upsert() {
        let repo = InMemoryDocumentsRepository::default();
        let replacement = document(json!({"book_name": "Dune", "book_quantity": 4}));

        let result = repo
            .replace_one(
                Collection::AllBooks,
                &Filter::equals("book_name", "Dune"),
                replacement.clone(),
                false,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 0);
        assert_eq!(result.upserted_id, None);
        assert!(repo.find(Collection::AllBooks, &Filter::all()).await.unwrap().is_empty());

        let result = repo
            .replace_one(
                Collection::AllBooks,
                &Filter::equals("book_name", "Dune"),
                replacement.clone(),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.upserted_count, 1);
        let upserted_id = result.upserted_id.expect("Upserted id missing");

        let result = repo
            .replace_one(
                Collection::AllBooks,
                &Filter::equals("book_name", "Dune"),
                document(json!({"book_name": "Dune"})),
                true,
            )
            .await
            .unwrap();
        assert_eq!(result.matched_count, 1);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.upserted_id, None);

        let books = repo.find(Collection::AllBooks, &Filter::all()).await.unwrap();
        assert_eq!(
            books,
            vec![document(json!({"_id": upserted_id, "book_name": "Dune"}))]
        );
    }

    #[tokio::test]
    /// Tests that delete removes only the first match in insertion order
    async fn test_delete_first_match() {
        let repo = InMemoryDocumentsRepository::default();
        for (user_email, book_name) in [("a@x.io", "Dune"), ("b@x.io", "Dune"), ("a@x.io", "Emma")] {
            repo.insert_one(
                Collection::BorrowedBooks,
                document(json!({"user_email": user_email, "book_name": book_name})),
            )
            .await
            .unwrap();
        }

        let result = repo
            .delete_one(Collection::BorrowedBooks, &Filter::equals("book_name", "Dune"))
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 1);

        let remaining: Vec<Document> = repo
            .find(Collection::BorrowedBooks, &Filter::all())
            .await
            .unwrap()
            .into_iter()
            .map(without_id)
            .collect();
        assert_eq!(
            remaining,
            vec![
                document(json!({"user_email": "b@x.io", "book_name": "Dune"})),
                document(json!({"user_email": "a@x.io", "book_name": "Emma"})),
            ]
        );

        let result = repo
            .delete_one(Collection::BorrowedBooks, &Filter::equals("book_name", "Ulysses"))
            .await
            .unwrap();
        assert_eq!(result.deleted_count, 0);
    }
}
