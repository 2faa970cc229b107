use actix_web::middleware::from_fn;
use actix_web::{web, Route};

use crate::auth_gate::require_token;
use crate::handlers;
use crate::request_logger::log_request;

/// Middleware stacked on a single route. The logger, when present, runs before the gate.
#[derive(Clone, Copy)]
struct Layers {
    logged: bool,
    guarded: bool,
}

const OPEN: Layers = Layers {
    logged: false,
    guarded: false,
};
const LOGGED: Layers = Layers {
    logged: true,
    guarded: false,
};
const LOGGED_AND_GUARDED: Layers = Layers {
    logged: true,
    guarded: true,
};

impl Layers {
    fn apply(self, route: Route) -> Route {
        let route = if self.guarded {
            route.wrap(from_fn(require_token))
        } else {
            route
        };
        if self.logged {
            route.wrap(from_fn(log_request))
        } else {
            route
        }
    }
}

pub fn config_app(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(OPEN.apply(web::get().to(handlers::liveness))))
        .service(web::resource("/jwt").route(LOGGED.apply(web::post().to(handlers::issue_token))))
        .service(web::resource("/logout").route(OPEN.apply(web::post().to(handlers::logout))))
        .service(
            web::resource("/users")
                .route(OPEN.apply(web::get().to(handlers::find_users)))
                .route(OPEN.apply(web::post().to(handlers::add_user))),
        )
        .service(
            web::resource("/books")
                .route(LOGGED_AND_GUARDED.apply(web::get().to(handlers::find_books)))
                .route(LOGGED_AND_GUARDED.apply(web::post().to(handlers::add_book)))
                .route(OPEN.apply(web::put().to(handlers::upsert_book)))
                .route(OPEN.apply(web::patch().to(handlers::decrease_book_quantity))),
        )
        .service(
            web::resource("/books/increase")
                .route(OPEN.apply(web::patch().to(handlers::increase_book_quantity))),
        )
        .service(
            web::resource("/books/update")
                .route(LOGGED_AND_GUARDED.apply(web::patch().to(handlers::update_book_fields))),
        )
        .service(
            web::resource("/borrowed-books")
                .route(OPEN.apply(web::post().to(handlers::add_borrowed_book)))
                .route(OPEN.apply(web::get().to(handlers::find_borrowed_books)))
                .route(OPEN.apply(web::delete().to(handlers::delete_borrowed_book))),
        );
}
