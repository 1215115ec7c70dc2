use std::convert::Infallible;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, error};
use serde::de::DeserializeOwned;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;
use warp::hyper::body::Bytes;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, CreateSessionRequest, StateResponse, TimeResponse};
use crate::authority::lease_manager::AuthorityManager;
use crate::authority::types::StatePayload;
use crate::error_handling::types::SyncError;

const MAX_BODY_BYTES: u64 = 16 * 1024;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct RouteContext {
    pub manager: Arc<AuthorityManager>,
    /// Base for shareable links; derived from the `Host` header when unset.
    pub public_url: Option<String>,
}

impl RouteContext {
    fn base_url(&self, host: Option<String>) -> String {
        match (&self.public_url, host) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(host)) => format!("http://{}", host),
            (None, None) => "http://localhost".to_string(),
        }
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> reply::Response {
    reply::with_status(
        reply::json(&ApiError {
            error: message.into(),
        }),
        status,
    )
    .into_response()
}

fn sync_error_reply(session_id: Option<Uuid>, err: &SyncError) -> reply::Response {
    match err {
        SyncError::NotFound => json_error(StatusCode::NOT_FOUND, err.to_string()),
        SyncError::Unauthorized => json_error(StatusCode::UNAUTHORIZED, err.to_string()),
        SyncError::InvalidState(message) => json_error(StatusCode::BAD_REQUEST, message.clone()),
        SyncError::Transient(detail) => {
            match session_id {
                Some(id) => error!("[{}] request failed: {}", id, detail),
                None => error!("Request failed: {}", detail),
            }
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

fn parse_id(raw: &str) -> Result<Uuid, reply::Response> {
    Uuid::parse_str(raw).map_err(|_| json_error(StatusCode::BAD_REQUEST, "Invalid session id"))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Option<T> {
    serde_json::from_slice(body).ok()
}

/// `Authorization: Bearer <credential>`, if present and non-empty.
fn bearer_credential(header: Option<String>) -> Option<String> {
    let header = header?;
    let credential = header.strip_prefix("Bearer ")?.trim();
    if credential.is_empty() {
        None
    } else {
        Some(credential.to_string())
    }
}

fn with_context(
    context: RouteContext,
) -> impl Filter<Extract = (RouteContext,), Error = Infallible> + Clone {
    warp::any().map(move || context.clone())
}

/// POST /api/sessions
pub fn create_session_route(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions")
        .and(warp::post())
        .and(warp::header::optional::<String>("host"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_context(context))
        .and_then(|host: Option<String>, body: Bytes, context: RouteContext| async move {
            let request: CreateSessionRequest = parse_body(&body).unwrap_or_default();
            let base_url = context.base_url(host);
            let res = match context.manager.create_session(&request.track_url, &base_url).await {
                Ok(created) => reply::with_status(reply::json(&created), StatusCode::OK).into_response(),
                Err(e) => sync_error_reply(None, &e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// GET /api/sessions/:id
pub fn get_session_route(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String)
        .and(warp::get())
        .and(with_context(context))
        .and_then(|id_str: String, context: RouteContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            let res = match context.manager.get_session(id).await {
                Ok(snapshot) => reply::with_status(reply::json(&snapshot), StatusCode::OK).into_response(),
                Err(e) => sync_error_reply(Some(id), &e),
            };
            Ok::<_, Rejection>(res)
        })
}

/// POST /api/sessions/:id/state
pub fn post_state_route(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "state")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::bytes())
        .and(with_context(context))
        .and_then(
            |id_str: String, authorization: Option<String>, body: Bytes, context: RouteContext| async move {
                let Some(credential) = bearer_credential(authorization) else {
                    return Ok::<_, Rejection>(json_error(StatusCode::UNAUTHORIZED, "Missing authorization"));
                };
                let request = match parse_body::<StatePayload>(&body).map(StatePayload::into_request) {
                    Some(Ok(request)) => request,
                    _ => return Ok(json_error(StatusCode::BAD_REQUEST, "Invalid payload")),
                };
                let id = match parse_id(&id_str) {
                    Ok(id) => id,
                    Err(res) => return Ok(res),
                };

                let res = match context
                    .manager
                    .validate_and_apply(id, Some(&credential), request)
                    .await
                {
                    Ok(applied) => reply::with_status(
                        reply::json(&StateResponse {
                            ok: true,
                            server_time: applied.server_time,
                        }),
                        StatusCode::OK,
                    )
                    .into_response(),
                    Err(e) => sync_error_reply(Some(id), &e),
                };
                Ok(res)
            },
        )
}

/// GET /api/time
pub fn time_route(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "time")
        .and(warp::get())
        .and(with_context(context))
        .map(|context: RouteContext| {
            reply::json(&TimeResponse {
                server_time: context.manager.server_time(),
            })
        })
}

/// GET /api/sessions/:id/events
///
/// Server-sent events: one `session` event with the public snapshot per
/// committed update. Slow consumers skip ahead rather than block the store.
pub fn session_events_route(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("api" / "sessions" / String / "events")
        .and(warp::get())
        .and(with_context(context))
        .and_then(|id_str: String, context: RouteContext| async move {
            let id = match parse_id(&id_str) {
                Ok(id) => id,
                Err(res) => return Ok::<_, Rejection>(res),
            };
            if let Err(e) = context.manager.get_session(id).await {
                return Ok(sync_error_reply(Some(id), &e));
            }

            let updates = BroadcastStream::new(context.manager.subscribe(id)).filter_map(
                move |update| async move {
                    let session = match update {
                        Ok(session) => session,
                        Err(e) => {
                            debug!("[{}] event stream lagged: {}", id, e);
                            return None;
                        }
                    };
                    match warp::sse::Event::default().event("session").json_data(session.snapshot()) {
                        Ok(event) => Some(Ok::<_, Infallible>(event)),
                        Err(e) => {
                            error!("[{}] failed to encode session event: {}", id, e);
                            None
                        }
                    }
                },
            );
            debug!("[{}] event stream opened", id);
            Ok(warp::sse::reply(warp::sse::keep_alive().stream(updates)).into_response())
        })
}

/// Every route of the authority.
pub fn api_routes(
    context: RouteContext,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    create_session_route(context.clone())
        .or(session_events_route(context.clone()))
        .or(post_state_route(context.clone()))
        .or(get_session_route(context.clone()))
        .or(time_route(context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authority::types::CreatedSession;
    use crate::clock::ManualClock;
    use crate::configuration::types::ServerConfig;
    use crate::storage::memory_storage::MemoryStorage;
    use crate::storage::types::SessionSnapshot;
    use serde_json::json;

    fn context(public_url: Option<&str>) -> (RouteContext, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let manager = AuthorityManager::new(
            Arc::new(MemoryStorage::new()),
            clock.clone(),
            &ServerConfig::default(),
        );
        (
            RouteContext {
                manager: Arc::new(manager),
                public_url: public_url.map(str::to_string),
            },
            clock,
        )
    }

    async fn create(context: &RouteContext) -> CreatedSession {
        let res = warp::test::request()
            .method("POST")
            .path("/api/sessions")
            .header("host", "radio.local:8080")
            .json(&json!({ "track_url": "https://soundcloud.com/artist/track" }))
            .reply(&api_routes(context.clone()))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        serde_json::from_slice(res.body()).unwrap()
    }

    fn error_of(body: &[u8]) -> String {
        serde_json::from_slice::<ApiError>(body).unwrap().error
    }

    #[tokio::test]
    async fn create_uses_host_header_or_public_url() {
        let (ctx, _) = context(None);
        let created = create(&ctx).await;
        assert_eq!(
            created.session_url_listener,
            format!("http://radio.local:8080/session/{}", created.session_id)
        );

        let (ctx, _) = context(Some("https://radio.example.com/"));
        let created = create(&ctx).await;
        assert!(created
            .session_url_host
            .starts_with("https://radio.example.com/session/"));
    }

    #[tokio::test]
    async fn create_rejects_bad_track_url() {
        let (ctx, _) = context(None);
        let routes = api_routes(ctx);
        for body in [json!({ "track_url": "https://example.com/x" }), json!({})] {
            let res = warp::test::request()
                .method("POST")
                .path("/api/sessions")
                .json(&body)
                .reply(&routes)
                .await;
            assert_eq!(res.status(), StatusCode::BAD_REQUEST);
            assert_eq!(error_of(res.body()), "Invalid track URL");
        }
    }

    #[tokio::test]
    async fn get_session_hides_secret_hash() {
        let (ctx, _) = context(None);
        let created = create(&ctx).await;
        let routes = api_routes(ctx);

        let res = warp::test::request()
            .path(&format!("/api/sessions/{}", created.session_id))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert!(body.get("authority_secret_hash").is_none());
        assert_eq!(body["playing"], json!(false));
        assert_eq!(body["position_ms"], json!(0));

        let res = warp::test::request()
            .path(&format!("/api/sessions/{}", Uuid::new_v4()))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(error_of(res.body()), "Session not found");

        let res = warp::test::request().path("/api/sessions/nope").reply(&routes).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn post_state_status_codes() {
        let (ctx, clock) = context(None);
        let created = create(&ctx).await;
        let routes = api_routes(ctx.clone());
        let path = format!("/api/sessions/{}/state", created.session_id);
        let bearer = format!("Bearer {}", created.host_secret.expose_secret());
        let body = json!({ "action": "PLAY", "playing": true, "position_ms": 1234.9 });

        let res = warp::test::request()
            .method("POST")
            .path(&path)
            .json(&body)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(res.body()), "Missing authorization");

        let res = warp::test::request()
            .method("POST")
            .path(&path)
            .header("authorization", "Bearer wrong")
            .json(&body)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_of(res.body()), "Invalid host secret");

        let res = warp::test::request()
            .method("POST")
            .path(&path)
            .header("authorization", bearer.as_str())
            .json(&json!({ "playing": "yes", "position_ms": 1 }))
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/sessions/{}/state", Uuid::new_v4()))
            .header("authorization", bearer.as_str())
            .json(&body)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        clock.advance_ms(500);
        let res = warp::test::request()
            .method("POST")
            .path(&path)
            .header("authorization", bearer.as_str())
            .json(&body)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["ok"], json!(true));
        assert_eq!(body["server_time"], json!("2023-11-14T22:13:20.500Z"));

        let snapshot: SessionSnapshot = serde_json::from_slice(
            warp::test::request()
                .path(&format!("/api/sessions/{}", created.session_id))
                .reply(&routes)
                .await
                .body(),
        )
        .unwrap();
        assert!(snapshot.playing);
        assert_eq!(snapshot.position_ms, 1234);
    }

    #[tokio::test]
    async fn out_of_range_position_is_stored_as_zero() {
        let (ctx, _) = context(None);
        let created = create(&ctx).await;
        let routes = api_routes(ctx.clone());
        let bearer = format!("Bearer {}", created.host_secret.expose_secret());

        let res = warp::test::request()
            .method("POST")
            .path(&format!("/api/sessions/{}/state", created.session_id))
            .header("authorization", bearer.as_str())
            .header("content-type", "application/json")
            .body(r#"{"action":"SEEK","playing":true,"position_ms":1e400}"#)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let snapshot = ctx.manager.get_session(created.session_id).await.unwrap();
        assert!(snapshot.playing);
        assert_eq!(snapshot.position_ms, 0);
    }

    #[tokio::test]
    async fn time_route_reports_authority_clock() {
        let (ctx, _) = context(None);
        let res = warp::test::request().path("/api/time").reply(&api_routes(ctx)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: TimeResponse = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body.server_time.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn events_route_rejects_unknown_session() {
        let (ctx, _) = context(None);
        let res = warp::test::request()
            .path(&format!("/api/sessions/{}/events", Uuid::new_v4()))
            .reply(&api_routes(ctx))
            .await;
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn bearer_parsing() {
        assert_eq!(bearer_credential(Some("Bearer abc".into())).as_deref(), Some("abc"));
        assert_eq!(bearer_credential(Some("Bearer  ".into())), None);
        assert_eq!(bearer_credential(Some("Basic abc".into())), None);
        assert_eq!(bearer_credential(None), None);
    }
}
