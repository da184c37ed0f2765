//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. One logical worker
//! handles many concurrent in-flight requests; every external call is an
//! awaited suspension point. Routing is a single match over method and
//! path.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::auth::{extract_token_from_header, JwtValidator};
use crate::cases::CaseService;
use crate::config::Args;
use crate::db::MongoClient;
use crate::notify::{self, ChannelRegistry, NotificationService, WsSink};
use crate::outbox::Outbox;
use crate::ratelimit::{limiter_key, LimitDecision, RateLimiter};
use crate::registration::CaseRegistrar;
use crate::routes;
use crate::search::SearchService;
use crate::types::Error;

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state, constructed once at startup and injected
/// into every handler
pub struct AppState {
    pub args: Args,
    pub mongo: MongoClient,
    pub jwt: JwtValidator,
    /// Absent when Redis never came up; requests then pass unthrottled
    pub limiter: Option<RateLimiter>,
    /// Live notification channels, one per user with sessions
    pub registry: Arc<ChannelRegistry<WsSink>>,
    pub notifier: Arc<NotificationService>,
    pub registrar: Arc<CaseRegistrar>,
    pub case_service: Arc<CaseService>,
    pub search: Arc<SearchService>,
    pub outbox: Outbox,
    /// Requests currently being handled; shutdown waits on this
    pub in_flight: AtomicUsize,
}

struct InFlightGuard(Arc<AppState>);

impl InFlightGuard {
    fn enter(state: Arc<AppState>) -> Self {
        state.in_flight.fetch_add(1, Ordering::Relaxed);
        Self(state)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Start the HTTP server. Returns once `shutdown` fires and the accept
/// loop has stopped; in-flight connections drain on their own tasks.
pub async fn run(
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> crate::types::Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Reunite listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    if state.args.dev_mode {
        warn!("Development mode enabled - insecure default JWT secret");
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        tokio::spawn(async move {
                            let io = TokioIo::new(stream);

                            let service = service_fn(move |req| {
                                let state = Arc::clone(&state);
                                async move { handle_request(state, addr, req).await }
                            });

                            if let Err(err) = http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades()
                                .await
                            {
                                error!("Error serving connection from {}: {:?}", addr, err);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {:?}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Shutdown requested, accept loop stopping");
                break;
            }
        }
    }

    Ok(())
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let _guard = InFlightGuard::enter(Arc::clone(&state));

    let method = req.method().clone();
    let path = req.uri().path().to_string();

    info!("[{}] {} {}", addr, method, path);

    // CORS preflight
    if method == Method::OPTIONS {
        return Ok(routes::cors_preflight());
    }

    // Probes and the long-lived stream sit outside the request limiter
    match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            return Ok(routes::health_check(Arc::clone(&state)));
        }
        (&Method::GET, "/ready") | (&Method::GET, "/readyz") => {
            return Ok(routes::readiness_check(Arc::clone(&state)).await);
        }
        (&Method::GET, "/version") => {
            return Ok(routes::version_info());
        }
        (&Method::GET, "/notifications/stream") => {
            if hyper_tungstenite::is_upgrade_request(&req) {
                return Ok(to_boxed(
                    notify::handle_stream_upgrade(Arc::clone(&state), req).await,
                ));
            }
            return Ok(routes::not_found_response(&path));
        }
        _ => {}
    }

    // Cross-cutting fixed-window limiter, keyed by identity else origin
    if let Some(ref limiter) = state.limiter {
        let identity = extract_token_from_header(
            req.headers()
                .get(hyper::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok()),
        )
        .and_then(|token| state.jwt.actor(token))
        .map(|actor| actor.id);

        let key = limiter_key(identity.as_deref(), &addr);
        if let LimitDecision::Limited { retry_after_secs } = limiter.check(&key).await {
            return Ok(routes::error_response(&Error::RateLimit {
                retry_after_secs,
            }));
        }
    }

    let response = match (method, path.as_str()) {
        (Method::POST, "/cases") => routes::handle_register(req, state).await,

        (Method::PUT, p) if routes::case_path_id(p, "/status").is_some() => {
            let case_id = routes::case_path_id(p, "/status").unwrap().to_string();
            routes::handle_close(req, state, &case_id).await
        }

        (Method::POST, p) if routes::case_path_id(p, "/flag").is_some() => {
            let case_id = routes::case_path_id(p, "/flag").unwrap().to_string();
            routes::handle_flag(req, state, &case_id).await
        }

        (Method::POST, p) if routes::case_path_id(p, "/assign").is_some() => {
            let case_id = routes::case_path_id(p, "/assign").unwrap().to_string();
            routes::handle_assign(req, state, &case_id).await
        }

        (Method::POST, "/find-matches") => routes::handle_find_matches(req, state).await,

        (Method::POST, "/notifications/read") => routes::handle_mark_read(req, state).await,

        (Method::POST, "/notifications/read-all") => {
            routes::handle_mark_all_read(req, state).await
        }

        _ => routes::not_found_response(&path),
    };

    Ok(response)
}

/// Convert a Full<Bytes> response (WebSocket upgrades) to the boxed body
fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}
