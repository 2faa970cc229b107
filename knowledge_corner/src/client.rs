use anyhow::{bail, Context};
use parking_lot::RwLock;
use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::{Response, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_tracing::TracingMiddleware;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::{
    Book, BookFieldsUpdate, BookNameQuery, BooksQuery, BorrowedBook, BorrowedBooksQuery,
    DeleteResult, Document, InsertOneResult, MessageResponse, SuccessResponse, UpdateResult,
    User, UsersQuery,
};

const TOKEN_COOKIE_PREFIX: &str = "token=";

/// Token value carried by a `Set-Cookie` header, empty when the cookie is being cleared
fn token_from_set_cookie(header: &str) -> Option<String> {
    header
        .split(';')
        .next()
        .and_then(|pair| pair.trim().strip_prefix(TOKEN_COOKIE_PREFIX))
        .map(str::to_string)
}

pub struct KnowledgeCornerClient {
    url: String,
    client: ClientWithMiddleware,
    token: RwLock<Option<String>>,
}

impl KnowledgeCornerClient {
    pub fn new(url: &str) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .build()
            .context("Failed to build reqwest client")?;
        let client = ClientBuilder::new(reqwest_client)
            // Insert the tracing middleware
            .with(TracingMiddleware::default())
            .build();

        Ok(Self {
            url: url.to_string(),
            client,
            token: RwLock::new(None),
        })
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replaces the held token, `None` drops it
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    fn with_token(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.read().as_ref() {
            Some(token) => request.header(COOKIE, format!("{}{}", TOKEN_COOKIE_PREFIX, token)),
            None => request,
        }
    }

    fn capture_token(&self, response: &Response) {
        if let Some(token) = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|header| header.to_str().ok())
            .find_map(token_from_set_cookie)
        {
            self.set_token(Some(token).filter(|token| !token.is_empty()));
        }
    }

    async fn parse<T: DeserializeOwned>(response: Response, operation: &str) -> anyhow::Result<T> {
        if response.status() == StatusCode::UNAUTHORIZED {
            let error: MessageResponse = response
                .json()
                .await
                .context("Failed to parse rejection")?;
            bail!("{} rejected: {}", operation, error.message)
        }
        if !response.status().is_success() {
            bail!("{} failed with status {}", operation, response.status())
        }
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", operation))
    }

    /// Calls GET / endpoint
    pub async fn liveness(&self) -> anyhow::Result<String> {
        let response = self.client.get(format!("{}/", self.url)).send().await?;
        if !response.status().is_success() {
            bail!("Liveness failed with status {}", response.status())
        }
        Ok(response.text().await?)
    }

    /// Calls POST /jwt endpoint
    /// Keeps the token from the returned cookie for the protected calls
    pub async fn issue_token(&self, identity: &Document) -> anyhow::Result<()> {
        let response = self
            .client
            .post(format!("{}/jwt", self.url))
            .json(identity)
            .send()
            .await?;
        self.capture_token(&response);
        let body: SuccessResponse = Self::parse(response, "Issue token").await?;
        if !body.success || self.token().is_none() {
            bail!("Token was not issued")
        }
        Ok(())
    }

    /// Calls POST /logout endpoint and forgets the held token
    pub async fn logout(&self, user: Option<&Value>) -> anyhow::Result<()> {
        let mut request = self.client.post(format!("{}/logout", self.url));
        if let Some(user) = user {
            request = request.json(user);
        }
        let response = request.send().await?;
        self.capture_token(&response);
        let _: SuccessResponse = Self::parse(response, "Logout").await?;
        self.set_token(None);
        Ok(())
    }

    /// Calls GET /users endpoint
    pub async fn find_users(&self, query: &UsersQuery) -> anyhow::Result<Vec<Document>> {
        let response = self
            .client
            .get(format!("{}/users", self.url))
            .query(query)
            .send()
            .await?;
        Self::parse(response, "Find users").await
    }

    /// Calls POST /users endpoint
    pub async fn add_user(&self, user: &User) -> anyhow::Result<InsertOneResult> {
        let response = self
            .client
            .post(format!("{}/users", self.url))
            .json(user)
            .send()
            .await?;
        Self::parse(response, "Add user").await
    }

    /// Calls GET /books endpoint, requires a token
    pub async fn find_books(&self, query: &BooksQuery) -> anyhow::Result<Vec<Document>> {
        let request = self.client.get(format!("{}/books", self.url)).query(query);
        let response = self.with_token(request).send().await?;
        Self::parse(response, "Find books").await
    }

    /// Calls POST /books endpoint, requires a token
    pub async fn add_book(&self, book: &Book) -> anyhow::Result<InsertOneResult> {
        let request = self.client.post(format!("{}/books", self.url)).json(book);
        let response = self.with_token(request).send().await?;
        Self::parse(response, "Add book").await
    }

    /// Calls PUT /books endpoint
    /// Replaces the first book named `book_name`, inserting `book` if there is none
    pub async fn upsert_book(&self, book_name: &str, book: &Book) -> anyhow::Result<UpdateResult> {
        let response = self
            .client
            .put(format!("{}/books", self.url))
            .query(&BookNameQuery {
                book_name: Some(book_name.to_string()),
            })
            .json(book)
            .send()
            .await?;
        Self::parse(response, "Upsert book").await
    }

    /// Calls PATCH /books endpoint
    pub async fn decrease_book_quantity(&self, book_name: &str) -> anyhow::Result<UpdateResult> {
        let response = self
            .client
            .patch(format!("{}/books", self.url))
            .query(&BookNameQuery {
                book_name: Some(book_name.to_string()),
            })
            .send()
            .await?;
        Self::parse(response, "Decrease book quantity").await
    }

    /// Calls PATCH /books/increase endpoint
    pub async fn increase_book_quantity(&self, book_name: &str) -> anyhow::Result<UpdateResult> {
        let response = self
            .client
            .patch(format!("{}/books/increase", self.url))
            .query(&BookNameQuery {
                book_name: Some(book_name.to_string()),
            })
            .send()
            .await?;
        Self::parse(response, "Increase book quantity").await
    }

    /// Calls PATCH /books/update endpoint, requires a token
    pub async fn update_book_fields(
        &self,
        book_name: &str,
        fields: &BookFieldsUpdate,
    ) -> anyhow::Result<UpdateResult> {
        let request = self
            .client
            .patch(format!("{}/books/update", self.url))
            .query(&BookNameQuery {
                book_name: Some(book_name.to_string()),
            })
            .json(fields);
        let response = self.with_token(request).send().await?;
        Self::parse(response, "Update book").await
    }

    /// Calls POST /borrowed-books endpoint
    pub async fn add_borrowed_book(
        &self,
        borrowed_book: &BorrowedBook,
    ) -> anyhow::Result<InsertOneResult> {
        let response = self
            .client
            .post(format!("{}/borrowed-books", self.url))
            .json(borrowed_book)
            .send()
            .await?;
        Self::parse(response, "Borrow book").await
    }

    /// Calls GET /borrowed-books endpoint
    pub async fn find_borrowed_books(
        &self,
        query: &BorrowedBooksQuery,
    ) -> anyhow::Result<Vec<Document>> {
        let response = self
            .client
            .get(format!("{}/borrowed-books", self.url))
            .query(query)
            .send()
            .await?;
        Self::parse(response, "Find borrowed books").await
    }

    /// Calls DELETE /borrowed-books endpoint
    /// Without `book_name` the server removes whichever record it finds first
    pub async fn return_book(&self, book_name: Option<&str>) -> anyhow::Result<DeleteResult> {
        let response = self
            .client
            .delete(format!("{}/borrowed-books", self.url))
            .query(&BookNameQuery {
                book_name: book_name.map(str::to_string),
            })
            .send()
            .await?;
        Self::parse(response, "Return book").await
    }
}

#[cfg(test)]
mod client_tests {
    use super::*;

    #[test]
    fn token_is_read_from_set_cookie() {
        assert_eq!(
            token_from_set_cookie("token=abc.def.ghi; HttpOnly; SameSite=None; Secure; Path=/"),
            Some("abc.def.ghi".to_string())
        );
        assert_eq!(
            token_from_set_cookie("token=; Max-Age=0; Path=/"),
            Some(String::new())
        );
        assert_eq!(token_from_set_cookie("session=xyz; Path=/"), None);
    }

    #[test]
    fn token_can_be_replaced_and_dropped() {
        let client = KnowledgeCornerClient::new("http://127.0.0.1:5000").unwrap();
        assert_eq!(client.token(), None);
        client.set_token(Some("abc".to_string()));
        assert_eq!(client.token(), Some("abc".to_string()));
        client.set_token(None);
        assert_eq!(client.token(), None);
    }
}
