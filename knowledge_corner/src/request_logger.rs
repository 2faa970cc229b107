use actix_web::body::MessageBody;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::Error;

/// Records method, host and full path of the call before passing it on
pub async fn log_request(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, Error> {
    {
        let connection_info = req.connection_info();
        let path = req
            .uri()
            .path_and_query()
            .map(|path_and_query| path_and_query.as_str())
            .unwrap_or_else(|| req.path());
        tracing::info!(
            method = %req.method(),
            host = %connection_info.host(),
            path = %path,
            "called"
        );
    }
    next.call(req).await
}

#[cfg(test)]
mod request_logger_tests {
    use actix_web::middleware::from_fn;
    use actix_web::{test, web, App, HttpResponse};

    use super::*;

    #[actix_web::test]
    async fn logged_route_still_reaches_handler() {
        let app = test::init_service(App::new().service(
            web::resource("/ping").route(
                web::get()
                    .to(|| async { HttpResponse::Ok().body("pong") })
                    .wrap(from_fn(log_request)),
            ),
        ))
        .await;

        let req = test::TestRequest::get().uri("/ping?verbose=1").to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "pong");
    }
}
