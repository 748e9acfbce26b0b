// Integration tests for the quiz room coordinator.
// These drive the real route stack in-process through warp's test utilities,
// so no running server is required.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use quizroom_server::config::{Config, ServerConfig, StoreConfig, TokenConfig};
use quizroom_server::coordinator::Coordinator;
use quizroom_server::api::routes;

fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        token: TokenConfig {
            secret: "integration-secret".to_string(),
            ttl_secs: 3600,
        },
        store: StoreConfig { timeout_ms: 250 },
    }
}

fn setup() -> (Arc<Coordinator>, String) {
    let coordinator = Coordinator::new(&test_config());
    let host_token = coordinator.tokens.issue_host_token("host_1").unwrap();
    (coordinator, host_token)
}

fn questions() -> Value {
    json!([
        {
            "id": "q1",
            "prompt": "What is the capital of France?",
            "options": ["Rome", "Paris"],
            "correct_option_index": 1,
            "time_limit_seconds": 60
        },
        {
            "id": "q2",
            "prompt": "What is the capital of Italy?",
            "options": ["Rome", "Berlin"],
            "correct_option_index": 0,
            "time_limit_seconds": 60
        }
    ])
}

async fn create_room<F>(api: &F, host_token: &str) -> String
where
    F: warp::Filter<Error = warp::Rejection> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/create")
        .header("authorization", format!("Bearer {host_token}"))
        .reply(api)
        .await;
    assert_eq!(resp.status(), 201);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    body["room_code"].as_str().unwrap().to_string()
}

async fn join_token<F>(api: &F, room_code: &str, display_name: &str) -> String
where
    F: warp::Filter<Error = warp::Rejection> + Clone + Send + Sync + 'static,
    F::Extract: warp::Reply + Send,
{
    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/join")
        .json(&json!({ "room_code": room_code, "display_name": display_name }))
        .reply(api)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    body["token"].as_str().unwrap().to_string()
}

async fn recv_event(client: &mut warp::test::WsClient) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), client.recv())
        .await
        .expect("timed out waiting for event")
        .expect("connection closed unexpectedly");
    serde_json::from_str(msg.to_str().unwrap()).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let (coordinator, _) = setup();
    let api = routes::routes(coordinator);

    let resp = warp::test::request().path("/health").reply(&api).await;
    assert_eq!(resp.status(), 200);

    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_room_creation_requires_host_credential() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator);

    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/create")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 401);

    let code = create_room(&api, &host_token).await;
    assert_eq!(code.len(), 6);
    assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
}

#[tokio::test]
async fn test_room_liveness_statuses() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());

    let resp = warp::test::request()
        .path("/api/room/ZZZZZZ")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 404);

    let code = create_room(&api, &host_token).await;
    let resp = warp::test::request()
        .path(&format!("/api/room/{code}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["status"], "open");

    coordinator.close_room(&code, "host_1").await.unwrap();
    let resp = warp::test::request()
        .path(&format!("/api/room/{code}"))
        .reply(&api)
        .await;
    // Ended is distinct from NotFound so clients can say "this room is over"
    assert_eq!(resp.status(), 410);
}

#[tokio::test]
async fn test_join_validation() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());
    let code = create_room(&api, &host_token).await;

    // Valid join hands back a verifiable token
    let token = join_token(&api, &code, "Alice").await;
    let verified = coordinator.tokens.verify_room_token(&token).unwrap();
    assert_eq!(verified.session.display_name, "Alice");
    assert_eq!(verified.session.room_code, code);

    // Empty name
    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/join")
        .json(&json!({ "room_code": code, "display_name": "  " }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 400);

    // Unknown room
    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/join")
        .json(&json!({ "room_code": "ZZZZZZ", "display_name": "Alice" }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 404);

    // Ended room
    coordinator.close_room(&code, "host_1").await.unwrap();
    let resp = warp::test::request()
        .method("POST")
        .path("/api/room/join")
        .json(&json!({ "room_code": code, "display_name": "Alice" }))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 410);
}

#[tokio::test]
async fn test_full_quiz_over_websocket() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());
    let code = create_room(&api, &host_token).await;

    // Host binds its credential to a socket
    let mut host = warp::test::ws()
        .path("/ws")
        .handshake(api.clone())
        .await
        .expect("host handshake");
    host.send_text(
        json!({ "type": "open-room", "room_code": code, "token": host_token }).to_string(),
    )
    .await;
    let event = recv_event(&mut host).await;
    assert_eq!(event["type"], "open-ack");
    assert_eq!(event["success"], true);

    // Participant joins with its room token
    let token = join_token(&api, &code, "Alice").await;
    let mut participant = warp::test::ws()
        .path("/ws")
        .handshake(api.clone())
        .await
        .expect("participant handshake");
    participant
        .send_text(json!({ "type": "join-room", "token": token }).to_string())
        .await;

    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "join-ack");
    assert_eq!(event["success"], true);
    assert_eq!(event["members"].as_array().unwrap().len(), 1);

    // The host sees the membership change
    let event = recv_event(&mut host).await;
    assert_eq!(event["type"], "new-participant");
    assert_eq!(event["display_name"], "Alice");

    // Host starts the quiz; both sockets observe the first question
    host.send_text(
        json!({ "type": "start-quiz", "room_code": code, "questions": questions() }).to_string(),
    )
    .await;
    for client in [&mut host, &mut participant] {
        let event = recv_event(client).await;
        assert_eq!(event["type"], "question-opened");
        assert_eq!(event["index"], 0);
        assert_eq!(event["question"]["id"], "q1");
        // The correct answer never goes over the wire
        assert!(event["question"].get("correct_option_index").is_none());
    }

    // First answer accepted, second rejected as duplicate
    participant
        .send_text(
            json!({
                "type": "submit-answer",
                "room_code": code,
                "question_id": "q1",
                "selected_option_index": 1
            })
            .to_string(),
        )
        .await;
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "submit-ack");
    assert_eq!(event["accepted"], true);

    participant
        .send_text(
            json!({
                "type": "submit-answer",
                "room_code": code,
                "question_id": "q1",
                "selected_option_index": 0
            })
            .to_string(),
        )
        .await;
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "submit-ack");
    assert_eq!(event["accepted"], false);
    assert_eq!(event["reason"], "duplicate");

    // Host skips to the next question
    host.send_text(json!({ "type": "advance", "room_code": code }).to_string())
        .await;
    for client in [&mut host, &mut participant] {
        let event = recv_event(client).await;
        assert_eq!(event["type"], "question-opened");
        assert_eq!(event["index"], 1);
    }

    // Advancing past the last question finishes the quiz
    host.send_text(json!({ "type": "advance", "room_code": code }).to_string())
        .await;
    for client in [&mut host, &mut participant] {
        let event = recv_event(client).await;
        assert_eq!(event["type"], "quiz-finished");
        let board = event["leaderboard"].as_array().unwrap();
        assert_eq!(board[0]["participant_id"], "Alice");
        assert_eq!(board[0]["correct_count"], 1);
        assert_eq!(board[0]["total_answered"], 1);
    }

    // Closing the room evicts everyone with a terminal broadcast
    host.send_text(json!({ "type": "close-room", "room_code": code }).to_string())
        .await;
    for client in [&mut host, &mut participant] {
        let event = recv_event(client).await;
        assert_eq!(event["type"], "room-closed");
    }
}

#[tokio::test]
async fn test_control_messages_require_host_binding() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator);
    let code = create_room(&api, &host_token).await;

    let token = join_token(&api, &code, "Mallory").await;
    let mut participant = warp::test::ws()
        .path("/ws")
        .handshake(api.clone())
        .await
        .expect("handshake");
    participant
        .send_text(json!({ "type": "join-room", "token": token }).to_string())
        .await;
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "join-ack");

    // A participant socket cannot drive progression
    participant
        .send_text(
            json!({ "type": "start-quiz", "room_code": code, "questions": questions() })
                .to_string(),
        )
        .await;
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["reason"], "forbidden");
}

#[tokio::test]
async fn test_submit_is_scoped_to_joined_room() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());
    let code_a = create_room(&api, &host_token).await;

    let other_host = coordinator.tokens.issue_host_token("host_2").unwrap();
    let code_b = create_room(&api, &other_host).await;
    coordinator
        .start_quiz(&code_b, "host_2", serde_json::from_value(questions()).unwrap())
        .await
        .unwrap();

    // Mallory is a member of room A only
    let token = join_token(&api, &code_a, "Mallory").await;
    let mut mallory = warp::test::ws()
        .path("/ws")
        .handshake(api.clone())
        .await
        .expect("handshake");
    mallory
        .send_text(json!({ "type": "join-room", "token": token }).to_string())
        .await;
    let event = recv_event(&mut mallory).await;
    assert_eq!(event["type"], "join-ack");

    // An answer aimed at room B's live quiz is rejected
    mallory
        .send_text(
            json!({
                "type": "submit-answer",
                "room_code": code_b,
                "question_id": "q1",
                "selected_option_index": 1
            })
            .to_string(),
        )
        .await;
    let event = recv_event(&mut mallory).await;
    assert_eq!(event["type"], "submit-ack");
    assert_eq!(event["accepted"], false);
    assert_eq!(event["reason"], "not-joined");

    // Room B's leaderboard never saw Mallory
    let board = coordinator.leaderboard(&code_b).await.unwrap();
    assert!(board.iter().all(|e| e.participant_id != "Mallory"));
}

#[tokio::test]
async fn test_deadline_auto_advances() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());
    let code = create_room(&api, &host_token).await;

    let token = join_token(&api, &code, "Alice").await;
    let mut participant = warp::test::ws()
        .path("/ws")
        .handshake(api.clone())
        .await
        .expect("handshake");
    participant
        .send_text(json!({ "type": "join-room", "token": token }).to_string())
        .await;
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "join-ack");

    coordinator
        .start_quiz(
            &code,
            "host_1",
            serde_json::from_value(json!([
                {
                    "id": "q1",
                    "prompt": "Fast one",
                    "options": ["A", "B"],
                    "correct_option_index": 0,
                    "time_limit_seconds": 1
                },
                {
                    "id": "q2",
                    "prompt": "Second",
                    "options": ["A", "B"],
                    "correct_option_index": 0,
                    "time_limit_seconds": 60
                }
            ]))
            .unwrap(),
        )
        .await
        .unwrap();

    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "question-opened");
    assert_eq!(event["index"], 0);

    // Nobody advances manually; the server deadline does it
    let event = recv_event(&mut participant).await;
    assert_eq!(event["type"], "question-opened");
    assert_eq!(event["index"], 1);
}

#[tokio::test]
async fn test_results_endpoint_is_host_gated() {
    let (coordinator, host_token) = setup();
    let api = routes::routes(coordinator.clone());
    let code = create_room(&api, &host_token).await;

    coordinator
        .start_quiz(
            &code,
            "host_1",
            serde_json::from_value(questions()).unwrap(),
        )
        .await
        .unwrap();
    coordinator.submit_answer(&code, "P1", "q1", 1).await.unwrap();

    let resp = warp::test::request()
        .path(&format!("/api/room/{code}/results"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 401);

    let resp = warp::test::request()
        .path(&format!("/api/room/{code}/results"))
        .header("authorization", format!("Bearer {host_token}"))
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["results"][0]["participant_id"], "P1");
    assert_eq!(body["results"][0]["correct_count"], 1);
}
