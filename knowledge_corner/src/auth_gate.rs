use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::error::ErrorInternalServerError;
use actix_web::http::StatusCode;
use actix_web::middleware::Next;
use actix_web::web::Data;
use actix_web::{Error, HttpMessage, HttpResponse, ResponseError};

use crate::api::{Document, MessageResponse};
use crate::token_service::{TokenError, TokenService};

/// Cookie carrying the token between client and server
pub const TOKEN_COOKIE: &str = "token";

/// Identity decoded from a verified token, available to handlers behind the gate
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedIdentity(pub Document);

#[derive(Debug, thiserror::Error)]
pub enum AuthGateError {
    #[error("not authorized")]
    MissingToken,

    #[error("Unauthorized")]
    InvalidToken(#[source] TokenError),
}

impl ResponseError for AuthGateError {
    fn status_code(&self) -> StatusCode {
        StatusCode::UNAUTHORIZED
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(MessageResponse {
            message: self.to_string(),
        })
    }
}

fn authenticate(req: &ServiceRequest) -> Result<Document, Error> {
    let token_service = req
        .app_data::<Data<TokenService>>()
        .ok_or_else(|| ErrorInternalServerError("Token service not configured"))?;

    let token = req
        .cookie(TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            tracing::warn!(path = %req.path(), "Request without token rejected");
            AuthGateError::MissingToken
        })?;

    token_service.verify(&token).map_err(|err| {
        tracing::warn!(path = %req.path(), error = %err, "Token verification failed");
        Error::from(AuthGateError::InvalidToken(err))
    })
}

/// Lets the request through only with a valid token cookie,
/// attaching the decoded identity to the request extensions
pub async fn require_token(
    req: ServiceRequest,
    next: Next<impl MessageBody + 'static>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    match authenticate(&req) {
        Ok(identity) => {
            tracing::info!(identity = ?identity, "Value in the token");
            req.extensions_mut().insert(AuthenticatedIdentity(identity));
            Ok(next.call(req).await?.map_into_left_body())
        }
        Err(err) => Ok(req.error_response(err).map_into_right_body()),
    }
}

#[cfg(test)]
mod auth_gate_tests {
    use actix_web::cookie::Cookie;
    use actix_web::middleware::from_fn;
    use actix_web::{test, web, App, HttpResponse};
    use serde_json::{json, Value};

    use super::*;

    const SECRET: &str = "gate-secret";

    async fn echo_identity(identity: web::ReqData<AuthenticatedIdentity>) -> HttpResponse {
        HttpResponse::Ok().json(&identity.0)
    }

    fn identity() -> Document {
        match json!({"email": "reader@knowledge.corner"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[actix_web::test]
    async fn gate_attaches_identity_for_valid_token() {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(TokenService::new(SECRET)))
                .service(
                    web::resource("/me")
                        .route(web::get().to(echo_identity).wrap(from_fn(require_token))),
                ),
        )
        .await;
        let token = TokenService::new(SECRET).issue(identity()).unwrap();

        let req = test::TestRequest::get()
            .uri("/me")
            .cookie(Cookie::new(TOKEN_COOKIE, token))
            .to_request();
        let body: Document = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, identity());
    }

    #[actix_web::test]
    async fn gate_distinguishes_missing_and_invalid_token() {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(TokenService::new(SECRET)))
                .service(
                    web::resource("/me")
                        .route(web::get().to(echo_identity).wrap(from_fn(require_token))),
                ),
        )
        .await;

        let req = test::TestRequest::get().uri("/me").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: MessageResponse = test::read_body_json(resp).await;
        assert_eq!(body.message, "not authorized");

        let forged = TokenService::new("other-secret").issue(identity()).unwrap();
        let req = test::TestRequest::get()
            .uri("/me")
            .cookie(Cookie::new(TOKEN_COOKIE, forged))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let body: MessageResponse = test::read_body_json(resp).await;
        assert_eq!(body.message, "Unauthorized");
    }
}
