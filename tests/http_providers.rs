//! Integration tests for the HTTP-backed providers.
//!
//! Each test spins up an Axum stub on a random port standing in for the
//! completion service or the Telegram Bot API, and drives the real clients
//! against it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use inbox_responder::channels::{InboxProvider, InboxScanner, TelegramInbox};
use inbox_responder::llm::{OpenRouterConfig, OpenRouterProvider, ReplyGenerator};
use inbox_responder::pipeline::{
    DispatchConfig, Eligibility, ItemId, ReplyOutcome, Responder, SeenSet,
};
use inbox_responder::store::SeenStore;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Start an Axum server on a random port, return its base URL.
async fn start_server(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://127.0.0.1:{port}")
}

fn completion_body(content: &str) -> Value {
    json!({
        "id": "gen-1",
        "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }],
        "usage": { "prompt_tokens": 12, "completion_tokens": 4 }
    })
}

fn generator(base: &str, request_timeout: Duration) -> ReplyGenerator {
    let provider = OpenRouterProvider::new(OpenRouterConfig {
        api_key: SecretString::from("sk-test"),
        model: "openai/gpt-oss-20b:free".to_string(),
        url: format!("{base}/api/v1/chat/completions"),
        timeout: request_timeout,
        reasoning: true,
    })
    .unwrap();
    ReplyGenerator::new(Arc::new(provider), "You are Mukuu 🐼")
}

/// Stub that always answers with the given status and raw body.
async fn fixed_completion_server(status: StatusCode, body: &'static str) -> String {
    let app = Router::new().route(
        "/api/v1/chat/completions",
        post(move || async move { (status, body) }),
    );
    start_server(app).await
}

// ── Completion provider ─────────────────────────────────────────────

#[tokio::test]
async fn completion_success_sends_single_turn_with_bearer() {
    let recorded: Arc<Mutex<Option<(HeaderMap, Value)>>> = Arc::new(Mutex::new(None));
    let rec = Arc::clone(&recorded);
    let app = Router::new().route(
        "/api/v1/chat/completions",
        post(move |headers: HeaderMap, Json(body): Json<Value>| {
            let rec = Arc::clone(&rec);
            async move {
                *rec.lock().unwrap() = Some((headers, body));
                Json(completion_body("  hi there 🐼 \n"))
            }
        }),
    );
    let base = start_server(app).await;

    let outcome = timeout(TEST_TIMEOUT, generator(&base, Duration::from_secs(5)).generate("hello"))
        .await
        .unwrap();
    assert_eq!(outcome, ReplyOutcome::Success("hi there 🐼".to_string()));

    let (headers, body) = recorded.lock().unwrap().take().expect("no request recorded");
    assert_eq!(headers["authorization"], "Bearer sk-test");
    assert_eq!(body["model"], "openai/gpt-oss-20b:free");
    assert_eq!(body["reasoning"]["enabled"], true);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "system");
    assert_eq!(messages[0]["content"], "You are Mukuu 🐼");
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[1]["content"], "hello");
}

#[tokio::test]
async fn completion_server_error_is_provider_error() {
    let base = fixed_completion_server(StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").await;
    match generator(&base, Duration::from_secs(5)).generate("hello").await {
        ReplyOutcome::ProviderError(detail) => {
            assert!(detail.contains("500"), "{detail}");
            assert!(detail.contains("upstream exploded"), "{detail}");
        }
        other => panic!("expected ProviderError, got {other:?}"),
    }
}

#[tokio::test]
async fn completion_malformed_body_is_provider_error() {
    let base = fixed_completion_server(StatusCode::OK, "<html>definitely not json</html>").await;
    assert!(matches!(
        generator(&base, Duration::from_secs(5)).generate("hello").await,
        ReplyOutcome::ProviderError(_)
    ));

    let base = fixed_completion_server(StatusCode::OK, r#"{"choices": []}"#).await;
    assert!(matches!(
        generator(&base, Duration::from_secs(5)).generate("hello").await,
        ReplyOutcome::ProviderError(_)
    ));
}

#[tokio::test]
async fn completion_empty_content_is_provider_error() {
    let base = fixed_completion_server(
        StatusCode::OK,
        r#"{"choices": [{"message": {"role": "assistant", "content": "   "}}]}"#,
    )
    .await;
    assert_eq!(
        generator(&base, Duration::from_secs(5)).generate("hello").await,
        ReplyOutcome::ProviderError("empty completion".to_string())
    );
}

#[tokio::test]
async fn completion_hung_server_times_out() {
    let app = Router::new().route(
        "/api/v1/chat/completions",
        post(|| async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Json(completion_body("too late"))
        }),
    );
    let base = start_server(app).await;

    let outcome = timeout(
        TEST_TIMEOUT,
        generator(&base, Duration::from_millis(200)).generate("hello"),
    )
    .await
    .expect("generation was not bounded by its timeout");
    assert!(matches!(outcome, ReplyOutcome::ProviderError(_)));
}

// ── Telegram inbox + full responder ─────────────────────────────────

const TOKEN: &str = "TEST";

fn telegram_updates() -> Value {
    json!([
        {
            "update_id": 100,
            "message": {
                "message_id": 1, "date": 1_700_000_000,
                "chat": { "id": 42, "type": "private", "first_name": "Alice" },
                "from": { "id": 42, "username": "alice" },
                "text": "hello"
            }
        },
        {
            "update_id": 101,
            "message": {
                "message_id": 7, "date": 1_700_000_001,
                "chat": { "id": -100, "type": "supergroup", "title": "Friends" },
                "from": { "id": 7, "first_name": "Bob" },
                "text": "just chatting"
            }
        },
        {
            "update_id": 102,
            "message": {
                "message_id": 8, "date": 1_700_000_002,
                "chat": { "id": -100, "type": "supergroup", "title": "Friends" },
                "from": { "id": 7, "first_name": "Bob" },
                "text": "hey @mukuu help"
            }
        }
    ])
}

struct TelegramStub {
    base: String,
    sent: Arc<Mutex<Vec<Value>>>,
    offsets: Arc<Mutex<Vec<i64>>>,
    member_count_calls: Arc<AtomicUsize>,
}

impl TelegramStub {
    fn inbox(&self) -> TelegramInbox {
        TelegramInbox::new(SecretString::from(TOKEN))
            .unwrap()
            .with_base_url(&self.base)
    }

    fn member_count_calls(&self) -> usize {
        self.member_count_calls.load(Ordering::SeqCst)
    }
}

async fn start_telegram_stub() -> TelegramStub {
    start_telegram_stub_with(StatusCode::OK, json!({ "ok": true, "result": 5 })).await
}

/// Stub whose `getChatMemberCount` always answers with `status` and `body`.
async fn start_telegram_stub_with(status: StatusCode, member_count_body: Value) -> TelegramStub {
    let delivered = Arc::new(AtomicBool::new(false));
    let sent: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let offsets: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    let updates_route = {
        let delivered = Arc::clone(&delivered);
        let offsets = Arc::clone(&offsets);
        post(move |Json(body): Json<Value>| {
            let delivered = Arc::clone(&delivered);
            let offsets = Arc::clone(&offsets);
            async move {
                offsets.lock().unwrap().push(body["offset"].as_i64().unwrap_or(-1));
                let result = if delivered.swap(true, Ordering::SeqCst) {
                    json!([])
                } else {
                    telegram_updates()
                };
                Json(json!({ "ok": true, "result": result }))
            }
        })
    };

    let member_count_calls = Arc::new(AtomicUsize::new(0));
    let member_count_route = {
        let calls = Arc::clone(&member_count_calls);
        post(move || {
            let calls = Arc::clone(&calls);
            let body = member_count_body.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                (status, Json(body))
            }
        })
    };

    let send_route = {
        let sent = Arc::clone(&sent);
        post(move |Json(body): Json<Value>| {
            let sent = Arc::clone(&sent);
            async move {
                sent.lock().unwrap().push(body);
                Json(json!({ "ok": true, "result": { "message_id": 999 } }))
            }
        })
    };

    let app = Router::new()
        .route(
            &format!("/bot{TOKEN}/getMe"),
            post(|| async {
                Json(json!({ "ok": true, "result": { "id": 555, "is_bot": true, "username": "mukuu_bot" } }))
            }),
        )
        .route(&format!("/bot{TOKEN}/getUpdates"), updates_route)
        .route(&format!("/bot{TOKEN}/getChatMemberCount"), member_count_route)
        .route(&format!("/bot{TOKEN}/sendMessage"), send_route);

    TelegramStub {
        base: start_server(app).await,
        sent,
        offsets,
        member_count_calls,
    }
}

#[tokio::test]
async fn telegram_verify_records_identity() {
    let stub = start_telegram_stub().await;
    let inbox = stub.inbox();

    let me = inbox.verify().await.unwrap();
    assert_eq!(me.id, "555");
    assert_eq!(me.username.as_deref(), Some("mukuu_bot"));
    assert_eq!(inbox.self_id().as_deref(), Some("555"));
}

#[tokio::test]
async fn telegram_bad_token_fails_verify() {
    let stub = start_telegram_stub().await;
    let inbox = TelegramInbox::new(SecretString::from("WRONG"))
        .unwrap()
        .with_base_url(&stub.base);
    assert!(inbox.verify().await.is_err());
}

#[tokio::test]
async fn telegram_lists_and_fetches_conversations() {
    let stub = start_telegram_stub().await;
    let inbox = stub.inbox();

    let threads = inbox.list_threads().await.unwrap();
    let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["-100", "42"]);

    let group = inbox.fetch_thread(&threads[0]).await.unwrap();
    assert_eq!(group.participant_count, Some(5));
    assert_eq!(group.title.as_deref(), Some("Friends"));
    assert_eq!(group.items.len(), 2);

    let direct = inbox.fetch_thread(&threads[1]).await.unwrap();
    assert_eq!(direct.participant_count, Some(2));
    assert_eq!(direct.items[0].id, ItemId::from("42:1"));

    // The second poll acknowledges everything delivered by the first.
    inbox.list_threads().await.unwrap();
    assert_eq!(*stub.offsets.lock().unwrap(), vec![0, 103]);
}

#[tokio::test]
async fn idle_cycles_do_not_refetch_chats() {
    let stub = start_telegram_stub().await;
    let scanner = InboxScanner::new(Arc::new(stub.inbox()));

    let first = scanner.list_conversations().await.unwrap();
    assert_eq!(first.len(), 2);
    for _ in 0..4 {
        assert!(scanner.list_conversations().await.unwrap().is_empty());
    }
    assert_eq!(stub.member_count_calls(), 1);
}

#[tokio::test]
async fn kicked_group_is_dropped_after_one_refusal() {
    let stub = start_telegram_stub_with(
        StatusCode::FORBIDDEN,
        json!({
            "ok": false,
            "error_code": 403,
            "description": "Forbidden: bot was kicked from the supergroup chat"
        }),
    )
    .await;
    let scanner = InboxScanner::new(Arc::new(stub.inbox()));

    let first = scanner.list_conversations().await.unwrap();
    let ids: Vec<&str> = first.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec!["42"]);
    for _ in 0..4 {
        assert!(scanner.list_conversations().await.unwrap().is_empty());
    }
    assert_eq!(stub.member_count_calls(), 1);
}

#[tokio::test]
async fn refusal_without_error_code_still_drops_group() {
    let stub = start_telegram_stub_with(
        StatusCode::OK,
        json!({ "ok": false, "description": "bot was kicked" }),
    )
    .await;
    let scanner = InboxScanner::new(Arc::new(stub.inbox()));

    for _ in 0..5 {
        scanner.list_conversations().await.unwrap();
    }
    assert_eq!(stub.member_count_calls(), 1);
}

#[tokio::test]
async fn transient_member_count_failure_is_retried_next_cycle() {
    let stub = start_telegram_stub_with(
        StatusCode::BAD_GATEWAY,
        json!({ "ok": false, "error_code": 502, "description": "Bad Gateway" }),
    )
    .await;
    let scanner = InboxScanner::new(Arc::new(stub.inbox()));

    let first = scanner.list_conversations().await.unwrap();
    assert_eq!(first.len(), 1);
    for _ in 0..2 {
        assert!(scanner.list_conversations().await.unwrap().is_empty());
    }
    assert_eq!(stub.member_count_calls(), 3);
}

#[tokio::test]
async fn responder_replies_to_direct_and_mention_only_once() {
    let stub = start_telegram_stub().await;
    let completion = {
        let app = Router::new().route(
            "/api/v1/chat/completions",
            post(|| async { Json(completion_body("hi there 🐼")) }),
        );
        start_server(app).await
    };

    let telegram = stub.inbox();
    telegram.verify().await.unwrap();
    let inbox: Arc<dyn InboxProvider> = Arc::new(telegram);

    let dir = tempfile::tempdir().unwrap();
    let store = SeenStore::new(dir.path().join("processed_ids.json"));
    let mut responder = Responder::new(
        Arc::clone(&inbox),
        generator(&completion, Duration::from_secs(5)),
        Eligibility::new("mukuu").with_self_id(inbox.self_id().unwrap()),
        store.clone(),
        SeenSet::new(),
        DispatchConfig {
            poll_interval: Duration::from_secs(60),
            send_delay_min: Duration::ZERO,
            send_delay_max: Duration::ZERO,
        },
    );

    let reports = timeout(TEST_TIMEOUT, responder.run_cycles(2)).await.unwrap();
    assert_eq!(reports[0].replied, 2);
    assert_eq!(reports[0].ignored, 1);
    assert_eq!(reports[1].replied, 0);

    let sent = stub.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 2);
    let chats: Vec<&str> = sent.iter().map(|b| b["chat_id"].as_str().unwrap()).collect();
    assert_eq!(chats, vec!["-100", "42"]);
    assert!(sent.iter().all(|b| b["text"] == "hi there 🐼"));

    let persisted = store.load().await;
    assert_eq!(persisted.len(), 3);
    assert!(persisted.contains(&ItemId::from("-100:7")));
}
