use std::sync::Arc;

use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::coordinator::Coordinator;
use crate::error::CoordinatorError;
use crate::room::RoomStatus;

use super::protocol::{CreateRoomResponse, JoinRequest, JoinResponse};
use super::ws;

/// Composes every route of the coordinator service.
pub fn routes(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    create_room(coordinator.clone())
        .or(room_results(coordinator.clone()))
        .or(check_room(coordinator.clone()))
        .or(join_room(coordinator.clone()))
        .or(websocket(coordinator))
        .or(health_check())
}

pub fn health_check() -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Quiz Room Coordinator",
        }))
    })
}

/// `POST /api/room/create` — host-authenticated room creation.
pub fn create_room(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "room" / "create")
        .and(warp::post())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_coordinator(coordinator))
        .then(|auth: Option<String>, coordinator: Arc<Coordinator>| async move {
            match coordinator.create_room(auth.as_deref()).await {
                Ok(room) => warp::reply::with_status(
                    warp::reply::json(&CreateRoomResponse {
                        room_code: room.code,
                    }),
                    StatusCode::CREATED,
                ),
                Err(err) => error_reply(&err),
            }
        })
}

/// `GET /api/room/:code` — public liveness check. Ended rooms answer 410 so
/// clients can tell "this room has ended" from "doesn't exist".
pub fn check_room(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "room" / String)
        .and(warp::get())
        .and(with_coordinator(coordinator))
        .then(|code: String, coordinator: Arc<Coordinator>| async move {
            match coordinator.check_room(&code).await {
                Ok(RoomStatus::Open) => warp::reply::with_status(
                    warp::reply::json(&serde_json::json!({
                        "room_code": code.to_ascii_uppercase(),
                        "status": "open",
                    })),
                    StatusCode::OK,
                ),
                Ok(RoomStatus::NotFound) => {
                    error_reply(&CoordinatorError::RoomNotFound(code))
                }
                Ok(RoomStatus::Ended) => error_reply(&CoordinatorError::RoomEnded(code)),
                Err(err) => error_reply(&err),
            }
        })
}

/// `POST /api/room/join` — exchanges {room_code, display_name} for a signed
/// room token.
pub fn join_room(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "room" / "join")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_coordinator(coordinator))
        .then(|body: JoinRequest, coordinator: Arc<Coordinator>| async move {
            match coordinator
                .issue_join_token(&body.room_code, &body.display_name)
                .await
            {
                Ok((room_code, token)) => warp::reply::with_status(
                    warp::reply::json(&JoinResponse { room_code, token }),
                    StatusCode::OK,
                ),
                Err(err) => error_reply(&err),
            }
        })
}

/// `GET /api/room/:code/results` — host-gated leaderboard snapshot.
pub fn room_results(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path!("api" / "room" / String / "results")
        .and(warp::get())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_coordinator(coordinator))
        .then(
            |code: String, auth: Option<String>, coordinator: Arc<Coordinator>| async move {
                let result = async {
                    let host = coordinator.tokens.verify_host_token(auth.as_deref())?;
                    let code = crate::room::RoomRegistry::normalize_code(&code)?;
                    coordinator.registry.require_owner(&code, &host.id).await?;
                    coordinator.leaderboard(&code).await.map(|board| (code, board))
                }
                .await;

                match result {
                    Ok((code, leaderboard)) => warp::reply::with_status(
                        warp::reply::json(&serde_json::json!({
                            "room_code": code,
                            "results": leaderboard,
                        })),
                        StatusCode::OK,
                    ),
                    Err(err) => error_reply(&err),
                }
            },
        )
}

/// `GET /ws` — the room-scoped real-time connection.
pub fn websocket(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = impl Reply, Error = warp::Rejection> + Clone {
    warp::path("ws")
        .and(warp::ws())
        .and(with_coordinator(coordinator))
        .map(|upgrade: warp::ws::Ws, coordinator: Arc<Coordinator>| {
            upgrade.on_upgrade(move |websocket| ws::handle_connection(websocket, coordinator))
        })
}

fn with_coordinator(
    coordinator: Arc<Coordinator>,
) -> impl Filter<Extract = (Arc<Coordinator>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || coordinator.clone())
}

fn error_reply(err: &CoordinatorError) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "message": err.to_string(),
            "reason": err.reason(),
        })),
        err.http_status(),
    )
}
