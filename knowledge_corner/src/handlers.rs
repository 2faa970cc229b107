use std::sync::Arc;

use actix_web::cookie::time::Duration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::error::ErrorBadRequest;
use actix_web::web::{self, Data};
use actix_web::{Error, HttpMessage, HttpRequest, HttpResponse};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::api::{
    Book, BookFieldsUpdate, BookNameQuery, BooksQuery, BorrowedBook, BorrowedBooksQuery,
    Document, SuccessResponse, User, UsersQuery,
};
use crate::auth_gate::TOKEN_COOKIE;
use crate::documents_repository::{
    Collection, DocumentsRepository, DocumentsRepositoryError, Filter, Update,
};
use crate::token_service::TokenService;

type Repository = Data<Arc<dyn DocumentsRepository>>;

pub const LIVENESS_MESSAGE: &str = "The Knowledge Corner Server is started.";

fn respond<T: Serialize>(
    operation: &str,
    result: Result<T, DocumentsRepositoryError>,
) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(body),
        Err(err) => {
            tracing::error!("{} failed {}", operation, err);
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Query parameter that is present and non-empty
fn supplied(param: &Option<String>) -> Option<&str> {
    param.as_deref().filter(|value| !value.is_empty())
}

/// Equality on `book_name`, an absent parameter compares against null
fn book_name_filter(query: &BookNameQuery) -> Filter {
    Filter::equals(
        "book_name",
        query
            .book_name
            .clone()
            .map(Value::from)
            .unwrap_or(Value::Null),
    )
}

/// Integer prefix of the value, NaN when there is none
fn parse_leading_integer(value: &str) -> f64 {
    let trimmed = value.trim_start();
    let (sign, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits: String = digits.chars().take_while(char::is_ascii_digit).collect();
    digits
        .parse::<f64>()
        .map(|number| sign * number)
        .unwrap_or(f64::NAN)
}

/// Body parsed as JSON only when it is sent as JSON, anything else reads as an empty object
fn json_body<T: DeserializeOwned + Default>(
    req: &HttpRequest,
    body: &web::Bytes,
) -> Result<T, Error> {
    let content_type = req.content_type();
    let is_json = content_type == "application/json" || content_type.ends_with("+json");
    if body.is_empty() || !is_json {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(ErrorBadRequest)
}

fn token_cookie(token: String) -> Cookie<'static> {
    Cookie::build(TOKEN_COOKIE, token)
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .finish()
}

pub async fn liveness() -> Result<HttpResponse, Error> {
    Ok(HttpResponse::Ok().body(LIVENESS_MESSAGE))
}

pub async fn issue_token(
    token_service: Data<TokenService>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let identity: Document = json_body(&req, &body)?;
    Ok(match token_service.issue(identity) {
        Ok(token) => HttpResponse::Ok()
            .cookie(token_cookie(token))
            .json(SuccessResponse { success: true }),
        Err(err) => {
            tracing::error!("Issue token failed {}", err);
            HttpResponse::InternalServerError().finish()
        }
    })
}

pub async fn logout(body: web::Bytes) -> Result<HttpResponse, Error> {
    let user: Option<Value> = serde_json::from_slice(&body).ok();
    tracing::info!(user = ?user, "Logging out");

    let removal = Cookie::build(TOKEN_COOKIE, "")
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::None)
        .max_age(Duration::ZERO)
        .finish();
    Ok(HttpResponse::Ok()
        .cookie(removal)
        .json(SuccessResponse { success: true }))
}

pub async fn find_users(
    repository: Repository,
    query: web::Query<UsersQuery>,
) -> Result<HttpResponse, Error> {
    let mut filter = Filter::all();
    if let Some(email) = supplied(&query.email) {
        filter = Filter::equals("email", email);
    }
    Ok(respond(
        "Find users",
        repository.find(Collection::LibraryUsers, &filter).await,
    ))
}

pub async fn add_user(
    repository: Repository,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let user: User = json_body(&req, &body)?;
    tracing::info!(user = ?user, "Adding user");
    Ok(respond(
        "Add user",
        repository
            .insert_one(Collection::LibraryUsers, user.into())
            .await,
    ))
}

/// Each supplied parameter replaces the filter built so far, the last one wins
pub async fn find_books(
    repository: Repository,
    query: web::Query<BooksQuery>,
) -> Result<HttpResponse, Error> {
    let mut filter = Filter::all();
    if let Some(book_name) = supplied(&query.book_name) {
        filter = Filter::equals("book_name", book_name);
    }
    if let Some(book_category) = supplied(&query.book_category) {
        filter = Filter::equals("book_category", book_category);
    }
    if let Some(book_quantity) = supplied(&query.book_quantity) {
        filter = Filter::greater_than("book_quantity", parse_leading_integer(book_quantity));
    }
    Ok(respond(
        "Find books",
        repository.find(Collection::AllBooks, &filter).await,
    ))
}

pub async fn add_book(
    repository: Repository,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let book: Book = json_body(&req, &body)?;
    tracing::info!(book = ?book, "Adding book");
    Ok(respond(
        "Add book",
        repository.insert_one(Collection::AllBooks, book.into()).await,
    ))
}

pub async fn upsert_book(
    repository: Repository,
    query: web::Query<BookNameQuery>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let book: Book = json_body(&req, &body)?;
    tracing::info!(book = ?book, "Upserting book");
    Ok(respond(
        "Upsert book",
        repository
            .replace_one(
                Collection::AllBooks,
                &book_name_filter(&query),
                book.into(),
                true,
            )
            .await,
    ))
}

async fn adjust_book_quantity(
    repository: Repository,
    query: web::Query<BookNameQuery>,
    by: i64,
) -> HttpResponse {
    tracing::info!(book_name = ?query.book_name, by, "Adjusting book quantity");
    let update = Update::Increment {
        field: "book_quantity".to_string(),
        by,
    };
    respond(
        "Adjust book quantity",
        repository
            .update_one(Collection::AllBooks, &book_name_filter(&query), &update)
            .await,
    )
}

pub async fn decrease_book_quantity(
    repository: Repository,
    query: web::Query<BookNameQuery>,
) -> Result<HttpResponse, Error> {
    Ok(adjust_book_quantity(repository, query, -1).await)
}

pub async fn increase_book_quantity(
    repository: Repository,
    query: web::Query<BookNameQuery>,
) -> Result<HttpResponse, Error> {
    Ok(adjust_book_quantity(repository, query, 1).await)
}

/// Filter uses the name from the query string, the body may carry a new name
pub async fn update_book_fields(
    repository: Repository,
    query: web::Query<BookNameQuery>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let fields: BookFieldsUpdate = json_body(&req, &body)?;
    tracing::info!(book_name = ?query.book_name, fields = ?fields, "Updating book");
    Ok(respond(
        "Update book",
        repository
            .update_one(
                Collection::AllBooks,
                &book_name_filter(&query),
                &Update::Set(fields.into()),
            )
            .await,
    ))
}

pub async fn add_borrowed_book(
    repository: Repository,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse, Error> {
    let borrowed_book: BorrowedBook = json_body(&req, &body)?;
    tracing::info!(borrowed_book = ?borrowed_book, "Borrowing book");
    Ok(respond(
        "Borrow book",
        repository
            .insert_one(Collection::BorrowedBooks, borrowed_book.into())
            .await,
    ))
}

/// A supplied `user_email` replaces the combined filter, so `book_name` never narrows the result
pub async fn find_borrowed_books(
    repository: Repository,
    query: web::Query<BorrowedBooksQuery>,
) -> Result<HttpResponse, Error> {
    let mut filter = Filter::all();
    if let (Some(user_email), Some(book_name)) =
        (supplied(&query.user_email), supplied(&query.book_name))
    {
        filter = Filter::equals("user_email", user_email)
            .and(Filter::equals("book_name", book_name));
    }
    if let Some(user_email) = supplied(&query.user_email) {
        filter = Filter::equals("user_email", user_email);
    }
    Ok(respond(
        "Find borrowed books",
        repository.find(Collection::BorrowedBooks, &filter).await,
    ))
}

/// Without `book_name` the filter is empty and the first record found is removed
pub async fn delete_borrowed_book(
    repository: Repository,
    query: web::Query<BookNameQuery>,
) -> Result<HttpResponse, Error> {
    let mut filter = Filter::all();
    if let Some(book_name) = supplied(&query.book_name) {
        filter = Filter::equals("book_name", book_name);
    }
    tracing::info!(book_name = ?query.book_name, "Returning book");
    Ok(respond(
        "Return book",
        repository
            .delete_one(Collection::BorrowedBooks, &filter)
            .await,
    ))
}
