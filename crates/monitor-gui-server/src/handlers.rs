//! HTTP binding of the session server.
//!
//! Implements:
//! - GET /health - Liveness probe
//! - GET /, /start, /workspace{/name} - Create a session and redirect to it
//! - GET|POST /session{/id{/method}} - Session calls through the dispatcher
//! - GET|POST /jsonfairy/{hook}/{*path}, /plotfairy/{hook}/{*path} - Source hooks
//! - GET /authenticate - Proxy authentication landing point

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Path, Query, Request, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderValue, Method};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Json, Router};
use monitor_gui_core::{HandlerError, Params, Reply, Requester};
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::ServerContext;
use crate::dispatch::{Outcome, SessionRequest};
use crate::error::{DispatchError, Result};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ServerContext>,
}

/// Build the router over `ctx`.
pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/authenticate", get(authenticate_handler))
        .route("/", get(index_handler))
        .route("/start", get(start_handler).post(start_handler))
        .route("/workspace", get(index_handler))
        .route("/workspace/{name}", get(workspace_handler))
        .route("/session", get(index_handler))
        .route(
            "/session/{id}",
            get(session_index_handler).post(session_index_handler),
        )
        .route(
            "/session/{id}/{method}",
            get(session_method_handler).post(session_method_handler),
        )
        .route(
            "/session/{id}/{method}/{*rest}",
            get(invalid_handler).post(invalid_handler),
        )
        .route(
            "/jsonfairy/{hook}/{*path}",
            get(json_source_handler).post(json_source_handler),
        )
        .route(
            "/plotfairy/{hook}/{*path}",
            get(plot_source_handler).post(plot_source_handler),
        )
        .with_state(AppState { ctx })
}

/// The client issuing the request, resolved from proxy headers and the peer
/// address.
pub struct Caller(pub Requester);

impl FromRequestParts<AppState> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let headers = &parts.headers;
        let requester = state.ctx.requester(
            |name| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string)
            },
            peer,
        );
        Ok(Caller(requester))
    }
}

/// Call parameters from the query string, merged with a url-encoded body.
///
/// Any other body is ignored, so clients may POST with whatever content
/// type they like. Body values win over query values of the same name.
pub struct RequestParams(pub Params);

impl<S> FromRequest<S> for RequestParams
where
    S: Send + Sync,
{
    type Rejection = DispatchError;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let Query(mut params) = Query::<Params>::from_request_parts(&mut parts, state)
            .await
            .map_err(|e| DispatchError::InvalidRequest(e.body_text()))?;

        let has_form_body = parts.method != Method::GET
            && parts.method != Method::HEAD
            && parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
        if has_form_body {
            let req = Request::from_parts(parts, body);
            let Form(form) = Form::<Params>::from_request(req, state)
                .await
                .map_err(|e| DispatchError::InvalidRequest(e.body_text()))?;
            params.extend(form);
        }
        Ok(RequestParams(params))
    }
}

/// Page moving the browser to `url`.
///
/// A script replaces the location instead of an HTTP redirect so that the
/// browser remembers the session address, not the address that created it.
fn redirect_page(url: &str) -> Response {
    Html(format!(
        "<html><head><script>location.replace('{}')</script></head>\
         <body><noscript>Please enable JavaScript to use this service</noscript></body></html>",
        url
    ))
    .into_response()
}

fn no_cache(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(
        header::EXPIRES,
        HeaderValue::from_static("Sun, 19 Nov 1978 05:00:00 GMT"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate"),
    );
    response
}

fn reply_response(reply: Reply) -> Response {
    let response = match reply {
        Reply::Json { body } => Json(body).into_response(),
        Reply::Text { body } => body.into_response(),
        page @ Reply::Page { .. } => Json(page).into_response(),
    };
    no_cache(response)
}

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    pub sessions: usize,
    pub pending_writes: usize,
}

/// GET /health
pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.ctx.store().len(),
        pending_writes: state.ctx.persister().pending(),
    })
}

/// GET /authenticate - Authentication happens in the front-end proxy; this
/// only gives it an address to land on.
pub async fn authenticate_handler() -> &'static str {
    "Authenticated"
}

async fn start_redirect(
    state: &AppState,
    workspace: &str,
    params: &Params,
    requester: &Requester,
) -> Result<Response> {
    let id = state
        .ctx
        .dispatcher()
        .start(workspace, params, requester)
        .await?;
    Ok(redirect_page(&state.ctx.settings().session_url(&id)))
}

/// GET / - Create a session in the default workspace.
pub async fn index_handler(
    State(state): State<AppState>,
    Caller(requester): Caller,
) -> Result<Response> {
    let workspace = state.ctx.plugins().default_workspace().name().to_string();
    start_redirect(&state, &workspace, &Params::new(), &requester).await
}

/// GET /start?workspace=NAME&... - Create a session configured by the
/// parameters.
pub async fn start_handler(
    State(state): State<AppState>,
    Caller(requester): Caller,
    RequestParams(params): RequestParams,
) -> Result<Response> {
    let workspace = match params.get("workspace") {
        Some(name) => name.clone(),
        None => state.ctx.plugins().default_workspace().name().to_string(),
    };
    start_redirect(&state, &workspace, &params, &requester).await
}

/// GET /workspace/{name} - Older form of `/start?workspace=NAME`.
pub async fn workspace_handler(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Path(name): Path<String>,
) -> Result<Response> {
    start_redirect(&state, &name, &Params::new(), &requester).await
}

async fn run_session(state: &AppState, requester: &Requester, request: SessionRequest) -> Response {
    let index = request.method.is_none();
    match state.ctx.dispatcher().dispatch(request, requester).await {
        Ok(Outcome::Redirect(id)) => redirect_page(&state.ctx.settings().session_url(&id)),
        Ok(Outcome::Reply(reply)) => reply_response(reply),
        // A browser landing on a stale session goes back to the root, which
        // creates a fresh one.
        Err(DispatchError::InvalidSession) if index => {
            debug!("Stale session page for {}, starting over", requester.identity());
            redirect_page(&format!("{}/", state.ctx.settings().base_url))
        }
        Err(e) => no_cache(e.into_response()),
    }
}

/// GET|POST /session/{id} - Main page of a session.
pub async fn session_index_handler(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Path(id): Path<String>,
    RequestParams(params): RequestParams,
) -> Response {
    let request = SessionRequest {
        session_id: Some(id),
        method: None,
        params,
    };
    run_session(&state, &requester, request).await
}

/// GET|POST /session/{id}/{method} - Asynchronous session call.
pub async fn session_method_handler(
    State(state): State<AppState>,
    Caller(requester): Caller,
    Path((id, method)): Path<(String, String)>,
    RequestParams(params): RequestParams,
) -> Response {
    let request = SessionRequest {
        session_id: Some(id),
        method: Some(method),
        params,
    };
    run_session(&state, &requester, request).await
}

pub async fn invalid_handler() -> DispatchError {
    DispatchError::InvalidRequest("too many path segments".to_string())
}

fn path_segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// GET|POST /jsonfairy/{hook}/{*path} - JSON from the source serving `hook`.
pub async fn json_source_handler(
    State(state): State<AppState>,
    Path((hook, path)): Path<(String, String)>,
    RequestParams(params): RequestParams,
) -> Result<Response> {
    let Some(source) = state.ctx.plugins().json_source(&hook).cloned() else {
        debug!("No JSON source for hook {}", hook);
        return Err(HandlerError::Unsupported.into());
    };

    let segments = path_segments(&path);
    let produced = tokio::task::spawn_blocking(move || source.get_json(&segments, &params)).await;
    match produced {
        Ok(Ok(value)) => Ok(no_cache(Json(value).into_response())),
        Ok(Err(e)) => {
            warn!("Unable to produce JSON for {}/{}: {}", hook, path, e);
            Err(HandlerError::Unsupported.into())
        }
        Err(e) => {
            warn!("JSON hook {} aborted: {}", hook, e);
            Err(HandlerError::Unsupported.into())
        }
    }
}

/// GET|POST /plotfairy/{hook}/{*path} - Image from the source serving `hook`.
pub async fn plot_source_handler(
    State(state): State<AppState>,
    Path((hook, path)): Path<(String, String)>,
    RequestParams(params): RequestParams,
) -> Result<Response> {
    let Some(source) = state.ctx.plugins().plot_source(&hook).cloned() else {
        debug!("No plot source for hook {}", hook);
        return Err(HandlerError::Unsupported.into());
    };

    let segments = path_segments(&path);
    let produced = tokio::task::spawn_blocking(move || source.plot(&segments, &params)).await;
    match produced {
        Ok(Ok(Some(image))) => {
            let response = ([(header::CONTENT_TYPE, image.content_type)], image.data);
            Ok(no_cache(response.into_response()))
        }
        Ok(Ok(None)) => Err(HandlerError::Unsupported.into()),
        Ok(Err(e)) => {
            warn!("Unable to produce a plot for {}/{}: {}", hook, path, e);
            Err(HandlerError::Unsupported.into())
        }
        Err(e) => {
            warn!("Plot hook {} aborted: {}", hook, e);
            Err(HandlerError::Unsupported.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ServerSettings;
    use crate::plugins::Plugins;
    use crate::workspace::BasicWorkspace;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use monitor_gui_core::{PlotImage, Source};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Histograms;

    impl Source for Histograms {
        fn name(&self) -> &str {
            "Histograms"
        }

        fn json_hook(&self) -> Option<&str> {
            Some("histo")
        }

        fn get_json(
            &self,
            path: &[String],
            params: &Params,
        ) -> std::result::Result<Value, HandlerError> {
            if path.first().map(String::as_str) == Some("broken") {
                return Err(HandlerError::Failed("no such histogram".to_string()));
            }
            Ok(json!({"path": path, "params": params}))
        }

        fn plot_hook(&self) -> Option<&str> {
            Some("histo")
        }

        fn plot(
            &self,
            path: &[String],
            _params: &Params,
        ) -> std::result::Result<Option<PlotImage>, HandlerError> {
            if path.is_empty() {
                return Ok(None);
            }
            Ok(Some(PlotImage {
                content_type: "image/png".to_string(),
                data: vec![0x89, b'P', b'N', b'G'],
            }))
        }
    }

    fn setup() -> (Router, Arc<ServerContext>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = ServerSettings::new(temp_dir.path().join("sessions"));
        settings.base_url = "/gui".to_string();
        let plugins = Plugins::builder()
            .workspace(Arc::new(BasicWorkspace::new("Summary")))
            .workspace(Arc::new(BasicWorkspace::new("Reports")))
            .source(Arc::new(Histograms))
            .build()
            .unwrap();
        let ctx = Arc::new(ServerContext::new(settings, plugins).unwrap());
        (router(ctx.clone()), ctx, temp_dir)
    }

    fn get(uri: &str, host: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("CMS-AUTH-HOST", host)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    /// Session id from a redirect page.
    fn redirected_id(page: &str) -> String {
        let start = page.find("/session/").unwrap() + "/session/".len();
        let rest = &page[start..];
        rest[..rest.find('\'').unwrap()].to_string()
    }

    async fn new_session(app: &Router, uri: &str, host: &str) -> String {
        let response = app.clone().oneshot(get(uri, host)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_text(response).await;
        assert!(page.contains("location.replace('/gui/session/"));
        redirected_id(&page)
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _ctx, _temp_dir) = setup();
        let response = app.oneshot(get("/health", "pc-1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["healthy"], true);
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn test_authenticate() {
        let (app, _ctx, _temp_dir) = setup();
        let response = app.oneshot(get("/authenticate", "pc-1")).await.unwrap();
        assert_eq!(body_text(response).await, "Authenticated");
    }

    #[tokio::test]
    async fn test_root_creates_session_and_index_page() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}", id), "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store, no-cache, must-revalidate"
        );
        let body = body_json(response).await;
        assert_eq!(body["kind"], "page");
        assert_eq!(body["variables"]["SESSION_ID"], id.as_str());
        assert_eq!(body["variables"]["USER"], "Console pc-1");
        assert_eq!(body["variables"]["WORKSPACE"], "Summary");
    }

    #[tokio::test]
    async fn test_start_and_workspace_routes() {
        let (app, ctx, _temp_dir) = setup();

        let id = new_session(&app, "/start?workspace=reports&run=7", "pc-1").await;
        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}/state", id), "pc-1"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["workspace"], "Reports");
        assert_eq!(body["extensions"]["Reports.start"]["run"], "7");

        new_session(&app, "/workspace/REPORTS", "pc-1").await;
        new_session(&app, "/session", "pc-1").await;
        assert_eq!(ctx.store().len(), 3);
    }

    #[tokio::test]
    async fn test_session_of_another_client() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}/state", id), "pc-2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "INVALID_SESSION");

        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}", id), "pc-2"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("location.replace('/gui/')"));
    }

    #[tokio::test]
    async fn test_invalid_session_requests() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}/state/extra", id), "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "INVALID_REQUEST");

        let response = app
            .clone()
            .oneshot(get(&format!("/session/{}/frobnicate", id), "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_workspace_switch_by_post() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/session/{}/workspace", id))
            .header("CMS-AUTH-HOST", "pc-1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Reports"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["workspace"], "Reports");
    }

    #[tokio::test]
    async fn test_post_without_form_body_uses_query() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/session/{}/workspace?name=Reports", id))
            .header("CMS-AUTH-HOST", "pc-1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["workspace"], "Reports");

        let request = Request::builder()
            .method("POST")
            .uri(format!("/session/{}/workspace?name=Summary", id))
            .header("CMS-AUTH-HOST", "pc-1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"name":"Reports"}"#))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["workspace"], "Summary");
    }

    #[tokio::test]
    async fn test_form_body_overrides_query() {
        let (app, _ctx, _temp_dir) = setup();
        let id = new_session(&app, "/", "pc-1").await;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/session/{}/workspace?name=Summary", id))
            .header("CMS-AUTH-HOST", "pc-1")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Reports"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["workspace"], "Reports");
    }

    #[tokio::test]
    async fn test_json_source_hook() {
        let (app, _ctx, _temp_dir) = setup();

        let response = app
            .clone()
            .oneshot(get("/jsonfairy/histo/run/1234?x=1", "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["path"], json!(["run", "1234"]));
        assert_eq!(body["params"]["x"], "1");

        let response = app
            .clone()
            .oneshot(get("/jsonfairy/histo/broken", "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .clone()
            .oneshot(get("/jsonfairy/other/run", "pc-1"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["code"], "UNSUPPORTED_REQUEST");
    }

    #[tokio::test]
    async fn test_plot_source_hook() {
        let (app, _ctx, _temp_dir) = setup();

        let response = app
            .clone()
            .oneshot(get("/plotfairy/histo/run/1234", "pc-1"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
        assert_eq!(response.headers().get(header::PRAGMA).unwrap(), "no-cache");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], &[0x89, b'P', b'N', b'G']);
    }
}
