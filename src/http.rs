//! actix-web surface: route, header, and body plumbing around the engine.

use actix_web::{
    dev::{Service, ServiceRequest, ServiceResponse},
    http::{
        header::{self, HeaderName, HeaderValue},
        StatusCode,
    },
    web, App, HttpRequest, HttpResponse, HttpServer, Scope,
};

use crate::engine::{Engine, Reply, ReplyBody};
use crate::error::ApiError;

/// Runs the server until shutdown.
pub async fn run(engine: Engine) -> eyre::Result<()> {
    let port = engine.config().port;
    let base_path = engine.config().base_path.clone();
    let data = web::Data::new(engine);

    log::info!("listening on 0.0.0.0:{port}");

    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .wrap_fn(replay_nonce)
            .service(service(&base_path))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await?;

    Ok(())
}

/// Stamps a fresh `Replay-Nonce` onto every response, errors included.
pub(crate) fn replay_nonce<S, B>(
    req: ServiceRequest,
    srv: &S,
) -> impl std::future::Future<Output = Result<ServiceResponse<B>, actix_web::Error>>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = actix_web::Error>,
{
    let fut = srv.call(req);
    async move {
        let mut res = fut.await?;
        let engine = res.request().app_data::<web::Data<Engine>>().cloned();
        if let Some(engine) = engine {
            let nonce = engine.nonces().issue();
            if let Ok(value) = HeaderValue::from_str(&nonce) {
                res.headers_mut()
                    .insert(HeaderName::from_static("replay-nonce"), value);
            }
        }
        Ok(res)
    }
}

/// All routes, mounted under the configured base path.
///
/// The pre-standard and draft path spellings (`new-reg`/`new-acct`,
/// `new-app`/`new-order`) both resolve to the same handlers.
pub(crate) fn service(base_path: &str) -> Scope {
    web::scope(base_path)
        .route("/directory", web::get().to(directory))
        .route("/new-nonce", web::head().to(new_nonce_head))
        .route("/new-nonce", web::get().to(new_nonce_get))
        .route("/new-acct", web::post().to(new_registration))
        .route("/new-reg", web::post().to(new_registration))
        .route("/new-app", web::post().to(new_order))
        .route("/new-order", web::post().to(new_order))
        .route("/reg/{id}", web::post().to(update_registration))
        .route("/app/{id}", web::post().to(get_order))
        .route("/app/{id}/finalize", web::post().to(finalize_order))
        .route("/authz/{id}", web::post().to(get_authz))
        .route("/authz/{id}/{index}", web::post().to(update_challenge))
        .route("/authz/{id}/{index}", web::get().to(fetch_challenge))
        .route("/cert/{id}", web::post().to(get_certificate))
        .route("/{type}/{id}", web::get().to(fetch_object))
}

fn render(result: Result<Reply, ApiError>) -> HttpResponse {
    let reply = match result {
        Ok(reply) => reply,
        Err(err) => return problem_response(&err),
    };

    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK);
    let mut builder = HttpResponse::build(status);
    if let Some(location) = &reply.location {
        builder.insert_header((header::LOCATION, location.as_str()));
    }
    if let Some(link) = &reply.link {
        builder.insert_header((header::LINK, link.as_str()));
    }

    match reply.body {
        ReplyBody::Json(value) => builder.json(value),
        ReplyBody::Der(bytes) => builder.content_type("application/pkix-cert").body(bytes),
        ReplyBody::Empty => builder.finish(),
    }
}

fn problem_response(err: &ApiError) -> HttpResponse {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match err.problem() {
        Some(problem) => HttpResponse::build(status)
            .content_type("application/problem+json")
            .json(problem),
        None => HttpResponse::build(status).finish(),
    }
}

async fn directory(engine: web::Data<Engine>) -> HttpResponse {
    HttpResponse::Ok().json(engine.directory())
}

async fn new_nonce_head() -> HttpResponse {
    HttpResponse::Ok()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn new_nonce_get() -> HttpResponse {
    HttpResponse::NoContent()
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish()
}

async fn new_registration(
    engine: web::Data<Engine>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.new_registration(&auth)),
    )
}

async fn update_registration(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.update_registration(&auth, &path)),
    )
}

async fn new_order(engine: web::Data<Engine>, req: HttpRequest, body: web::Bytes) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.new_order(&auth)),
    )
}

async fn get_order(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|_auth| engine.get_order(&path)),
    )
}

async fn finalize_order(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.finalize_order(&auth, &path)),
    )
}

async fn get_authz(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.get_authz(&auth, &path)),
    )
}

async fn update_challenge(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<(String, String)>,
    body: web::Bytes,
) -> HttpResponse {
    let (id, index) = path.into_inner();
    let auth = match engine.authenticate(&body, req.path()) {
        Ok(auth) => auth,
        Err(err) => return problem_response(&err),
    };
    render(engine.update_challenge(&auth, &id, &index).await)
}

async fn fetch_challenge(
    engine: web::Data<Engine>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (id, index) = path.into_inner();
    render(engine.fetch_challenge(&id, &index))
}

async fn get_certificate(
    engine: web::Data<Engine>,
    req: HttpRequest,
    path: web::Path<String>,
    body: web::Bytes,
) -> HttpResponse {
    render(
        engine
            .authenticate(&body, req.path())
            .and_then(|auth| engine.get_certificate(&auth, &path)),
    )
}

async fn fetch_object(
    engine: web::Data<Engine>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tag, id) = path.into_inner();
    render(engine.fetch_object(&tag, &id))
}
