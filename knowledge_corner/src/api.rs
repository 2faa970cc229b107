use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Opaque JSON object as stored in a collection
pub type Document = serde_json::Map<String, Value>;
pub type DocumentId = i32;

/// Field under which the storage key is exposed on documents read back
pub const ID_FIELD: &str = "_id";

/// Keeps an explicit `null` as `Some(Value::Null)`, only an absent key stays `None`
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Library user. Everything apart from the email is stored as supplied
pub struct User {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub email: Option<Value>,
    #[serde(flatten)]
    pub details: Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Catalog entry, `book_name` acts as the natural key but is not unique.
/// Field values are kept as sent, whatever their JSON type.
pub struct Book {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_name: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_photo: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_author: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_category: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_rating: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_quantity: Option<Value>,
    #[serde(flatten)]
    pub details: Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Record of a book borrowed by a user, keyed implicitly by (user_email, book_name)
pub struct BorrowedBook {
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub user_email: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub book_name: Option<Value>,
    #[serde(flatten)]
    pub details: Document,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
/// Fields replaced on a book by the field update route.
/// Every field is written, missing ones as null.
pub struct BookFieldsUpdate {
    #[serde(default)]
    pub book_name: Option<Value>,
    #[serde(default)]
    pub book_photo: Option<Value>,
    #[serde(default)]
    pub book_author: Option<Value>,
    #[serde(default)]
    pub book_category: Option<Value>,
    #[serde(default)]
    pub book_rating: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsersQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BooksQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_category: Option<String>,
    /// Lower (exclusive) bound on `book_quantity`, parsed leniently as an integer prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_quantity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookNameQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BorrowedBooksQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: DocumentId,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
/// Outcome of an update or replace. Zero `matched_count` means nothing was touched
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<DocumentId>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MessageResponse {
    pub message: String,
}

fn insert_present(document: &mut Document, field: &str, value: Option<Value>) {
    if let Some(value) = value {
        document.insert(field.to_string(), value);
    }
}

impl From<User> for Document {
    fn from(user: User) -> Self {
        let mut document = user.details;
        insert_present(&mut document, "email", user.email);
        document
    }
}

impl From<Book> for Document {
    fn from(book: Book) -> Self {
        let mut document = book.details;
        insert_present(&mut document, "book_name", book.book_name);
        insert_present(&mut document, "book_photo", book.book_photo);
        insert_present(&mut document, "book_author", book.book_author);
        insert_present(&mut document, "book_category", book.book_category);
        insert_present(&mut document, "book_rating", book.book_rating);
        insert_present(&mut document, "book_quantity", book.book_quantity);
        document
    }
}

impl From<BorrowedBook> for Document {
    fn from(borrowed_book: BorrowedBook) -> Self {
        let mut document = borrowed_book.details;
        insert_present(&mut document, "user_email", borrowed_book.user_email);
        insert_present(&mut document, "book_name", borrowed_book.book_name);
        document
    }
}

impl From<BookFieldsUpdate> for Document {
    fn from(update: BookFieldsUpdate) -> Self {
        let mut document = Document::new();
        for (field, value) in [
            ("book_name", update.book_name),
            ("book_photo", update.book_photo),
            ("book_author", update.book_author),
            ("book_category", update.book_category),
            ("book_rating", update.book_rating),
        ] {
            document.insert(field.to_string(), value.unwrap_or(Value::Null));
        }
        document
    }
}

#[cfg(test)]
mod api_tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn book_keeps_only_supplied_fields() {
        let book: Book = serde_json::from_value(json!({
            "book_name": "Dune",
            "book_quantity": 3,
            "shelf": "B2"
        }))
        .unwrap();

        let document = Document::from(book);
        assert_eq!(
            Value::Object(document),
            json!({"book_name": "Dune", "book_quantity": 3, "shelf": "B2"})
        );
    }

    #[test]
    fn book_keeps_explicit_nulls_and_any_json_type() {
        let body = json!({
            "book_name": 1984,
            "book_photo": null,
            "book_author": ["Orwell"],
            "book_quantity": "3"
        });
        let book: Book = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(book.book_photo, Some(Value::Null));
        assert_eq!(book.book_category, None);

        assert_eq!(Value::Object(book.into()), body);
    }

    #[test]
    fn fields_update_writes_missing_fields_as_null() {
        let update = BookFieldsUpdate {
            book_name: Some(json!("Dune Messiah")),
            book_rating: Some(json!(4.5)),
            ..BookFieldsUpdate::default()
        };

        assert_eq!(
            Value::Object(update.into()),
            json!({
                "book_name": "Dune Messiah",
                "book_photo": null,
                "book_author": null,
                "book_category": null,
                "book_rating": 4.5
            })
        );
    }

    #[test]
    fn acknowledgments_use_driver_field_names() {
        let result = UpdateResult {
            acknowledged: true,
            matched_count: 1,
            modified_count: 1,
            upserted_count: 0,
            upserted_id: None,
        };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({
                "acknowledged": true,
                "matchedCount": 1,
                "modifiedCount": 1,
                "upsertedCount": 0,
                "upsertedId": null
            })
        );
    }
}
