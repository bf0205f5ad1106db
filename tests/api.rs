//! End-to-end tests for the REST surface and the real-time socket.
//!
//! Everything runs against the in-memory store, so no external services are
//! needed: `cargo test --test api`.

use std::collections::HashMap;
use std::sync::Arc;

use notifier::config::Config;
use notifier::notification::email::EmailChannel;
use notifier::store::memory::{MemoryStore, StaticDirectory};
use notifier::AppState;

fn test_state() -> Arc<AppState> {
    state_with_email(EmailChannel::disabled())
}

fn state_with_email(email: EmailChannel) -> Arc<AppState> {
    let mut leaders = HashMap::new();
    leaders.insert("L1".to_string(), vec!["P1".to_string()]);
    Arc::new(AppState::new(
        Config::default(),
        Arc::new(MemoryStore::new()),
        Arc::new(StaticDirectory::new(leaders)),
        email,
    ))
}

mod rest_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::Router;
    use notifier::notification::email::{MailError, MailTransport, OutgoingMail};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn create(app: &Router, body: Value) -> Value {
        let (status, created) = call(app, Method::POST, "/notifications", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);
        created
    }

    #[tokio::test]
    async fn test_healthz() {
        let app = notifier::app(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-content-type-options"], "nosniff");
        assert!(resp.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_create_returns_201_with_record() {
        let app = notifier::app(test_state());
        let created = create(
            &app,
            json!({
                "title": "New project created",
                "message": "  leader@x.com created new project  ",
                "project": "P1"
            }),
        )
        .await;

        assert_eq!(created["title"], "New project created");
        assert_eq!(created["message"], "leader@x.com created new project");
        assert_eq!(created["project"], "P1");
        assert_eq!(created["actorEmail"], "leader@x.com");
        assert_eq!(created["read"], false);
        assert!(created["id"].is_string());
    }

    #[tokio::test]
    async fn test_blank_title_is_400() {
        let app = notifier::app(test_state());
        let (status, body) = call(
            &app,
            Method::POST,
            "/notifications",
            Some(json!({ "title": "   ", "message": "hello" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "invalid_request_error");

        let (status, list) = call(&app, Method::GET, "/notifications", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(list.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_missing_message_is_400() {
        let app = notifier::app(test_state());
        let (status, _) = call(
            &app,
            Method::POST,
            "/notifications",
            Some(json!({ "title": "Join request" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_mark_read_unknown_id_is_404() {
        let app = notifier::app(test_state());
        let uri = format!("/notifications/{}/read", uuid::Uuid::new_v4());
        let (status, body) = call(&app, Method::PATCH, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "notification_not_found");
    }

    #[tokio::test]
    async fn test_mark_read_is_idempotent() {
        let app = notifier::app(test_state());
        let created = create(&app, json!({ "title": "Project approved", "message": "ok" })).await;
        let uri = format!("/notifications/{}/read", created["id"].as_str().unwrap());

        for _ in 0..2 {
            let (status, body) = call(&app, Method::PATCH, &uri, None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["read"], true);
        }
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let app = notifier::app(test_state());
        let mut ids = Vec::new();
        for msg in ["t1", "t2", "t3"] {
            let created = create(&app, json!({ "title": "Project approved", "message": msg })).await;
            ids.push(created["id"].clone());
        }

        let (_, list) = call(&app, Method::GET, "/notifications", None).await;
        let listed: Vec<Value> = list.as_array().unwrap().iter().map(|n| n["id"].clone()).collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_list_caps_at_page_size() {
        let app = notifier::app(test_state());
        for i in 0..55 {
            create(&app, json!({ "title": "Project approved", "message": format!("n{}", i) })).await;
        }
        let (_, list) = call(&app, Method::GET, "/notifications", None).await;
        assert_eq!(list.as_array().unwrap().len(), 50);
        assert_eq!(list[0]["message"], "n54");
    }

    #[tokio::test]
    async fn test_participant_feed_filtering() {
        let app = notifier::app(test_state());
        create(&app, json!({ "title": "New project created", "message": "p@x.com created new project" })).await;
        create(&app, json!({ "title": "Activity Started", "message": "Your activity [Cleanup] has started." })).await;
        create(
            &app,
            json!({
                "title": "Join request approved",
                "message": "p@x.com - Your request to join \"Proj\" was approved."
            }),
        )
        .await;

        let (_, mine) = call(&app, Method::GET, "/notifications?participantEmail=p@x.com", None).await;
        let titles: Vec<&str> = mine
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Join request approved", "Activity Started"]);

        let (_, theirs) = call(&app, Method::GET, "/notifications?participantEmail=q@x.com", None).await;
        let titles: Vec<&str> = theirs
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["Activity Started"]);
    }

    #[tokio::test]
    async fn test_mark_read_all_and_unread_count() {
        let app = notifier::app(test_state());
        create(&app, json!({ "title": "Project approved", "message": "a" })).await;
        create(&app, json!({ "title": "Project rejected", "message": "b" })).await;

        let (_, count) = call(&app, Method::GET, "/notifications/unread", None).await;
        assert_eq!(count["count"], 2);

        let (status, body) = call(&app, Method::POST, "/notifications/mark-read-all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, count) = call(&app, Method::GET, "/notifications/unread", None).await;
        assert_eq!(count["count"], 0);

        // second call still succeeds and changes nothing
        let (status, body) = call(&app, Method::POST, "/notifications/mark-read-all", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["updated"], 0);
    }

    struct RejectingTransport(tokio::sync::mpsc::UnboundedSender<String>);

    #[async_trait::async_trait]
    impl MailTransport for RejectingTransport {
        async fn send(&self, mail: &OutgoingMail) -> Result<(), MailError> {
            let _ = self.0.send(mail.to.clone());
            Err(MailError::Transport("550 mailbox unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_mail_failure_still_creates_and_lists() {
        let (tx, mut attempts) = tokio::sync::mpsc::unbounded_channel();
        let app = notifier::app(state_with_email(EmailChannel::new(Arc::new(RejectingTransport(tx)))));

        let created = create(
            &app,
            json!({
                "title": "Join request declined",
                "message": "p@x.com - Your request to join \"Proj\" was declined.",
                "recipientEmail": "p@x.com"
            }),
        )
        .await;
        assert_eq!(created["title"], "Join request declined");

        let to = tokio::time::timeout(std::time::Duration::from_secs(2), attempts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(to, "p@x.com");

        let (status, feed) = call(&app, Method::GET, "/notifications?participantEmail=p@x.com", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(feed[0]["id"], created["id"]);
    }

    #[tokio::test]
    async fn test_participant_feed_not_crowded_out_by_other_records() {
        let app = notifier::app(test_state());
        let own = create(
            &app,
            json!({
                "title": "Join request approved",
                "message": "p@x.com - Your request to join \"Proj\" was approved.",
                "recipientEmail": "p@x.com"
            }),
        )
        .await;
        for i in 0..520 {
            create(
                &app,
                json!({ "title": "Project approved", "message": format!("project {} approved", i) }),
            )
            .await;
        }

        let (_, feed) = call(&app, Method::GET, "/notifications?participantEmail=p@x.com", None).await;
        let feed = feed.as_array().unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0]["id"], own["id"]);

        let (_, count) = call(&app, Method::GET, "/notifications/unread?participantEmail=p@x.com", None).await;
        assert_eq!(count["count"], 1);
    }

    #[tokio::test]
    async fn test_join_request_leaves_leader_feed_once_answered() {
        let app = notifier::app(test_state());
        let request = create(
            &app,
            json!({
                "title": "Join request",
                "message": "p@x.com wants to join Proj",
                "project": "P1"
            }),
        )
        .await;

        let (_, feed) = call(&app, Method::GET, "/notifications?leaderId=L1", None).await;
        assert_eq!(feed[0]["id"], request["id"]);

        create(
            &app,
            json!({
                "title": "Join request approved",
                "message": "p@x.com - Your request to join \"Proj\" was approved.",
                "recipientEmail": "p@x.com"
            }),
        )
        .await;

        let (_, feed) = call(&app, Method::GET, "/notifications?leaderId=L1", None).await;
        assert!(feed
            .as_array()
            .unwrap()
            .iter()
            .all(|n| n["id"] != request["id"]));
    }

    #[tokio::test]
    async fn test_leader_without_projects_sees_only_addressed() {
        let app = notifier::app(test_state());
        create(&app, json!({ "title": "Join request", "message": "p@x.com", "project": "P1" })).await;
        create(
            &app,
            json!({ "title": "Project approved", "message": "yours", "recipientEmail": "new@x.com" }),
        )
        .await;

        let (_, feed) = call(&app, Method::GET, "/notifications?leaderId=L9&leaderEmail=new@x.com", None).await;
        let feed = feed.as_array().unwrap();
        assert_eq!(feed.len(), 1);
        assert_eq!(feed[0]["title"], "Project approved");
    }

    #[tokio::test]
    async fn test_online_users_empty_without_sockets() {
        let app = notifier::app(test_state());
        let (status, body) = call(&app, Method::GET, "/auth/online-users", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["userIds"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = notifier::app(test_state());
        let (status, _) = call(&app, Method::GET, "/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

mod socket_tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use notifier::models::event::{ClientEvent, IdentifyPayload, ServerEvent};
    use serde_json::json;
    use tokio::net::TcpStream;
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

    type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, notifier::app(state)).await.unwrap();
        });
        addr
    }

    /// Connect and send `identify`. The server subscribes the connection
    /// before reading any frame, so once a broadcast caused by this identify
    /// comes back the connection is known to be live.
    async fn connect_as(addr: SocketAddr, user_id: &str) -> Socket {
        let (mut ws, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
        let identify = ClientEvent::Identify(IdentifyPayload {
            user_id: user_id.into(),
        });
        ws.send(Message::Text(serde_json::to_string(&identify).unwrap()))
            .await
            .unwrap();
        ws
    }

    async fn next_matching<F>(ws: &mut Socket, pred: F) -> ServerEvent
    where
        F: Fn(&ServerEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let event: ServerEvent = serde_json::from_str(&text).unwrap();
                        if pred(&event) {
                            return event;
                        }
                    }
                    Some(Ok(_)) => {}
                    other => panic!("socket ended early: {:?}", other),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    async fn wait_for_connections(state: &AppState, user: &str, expected: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while state.presence.connection_count(user) != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("presence count never settled");
    }

    fn online(user: &str) -> impl Fn(&ServerEvent) -> bool + '_ {
        move |e| matches!(e, ServerEvent::UserOnline(p) if p.user_id == user)
    }

    fn offline(user: &str) -> impl Fn(&ServerEvent) -> bool + '_ {
        move |e| matches!(e, ServerEvent::UserOffline(p) if p.user_id == user)
    }

    #[tokio::test]
    async fn test_admin_socket_receives_new_project() {
        let addr = spawn_server(test_state()).await;
        let mut admin = connect_as(addr, "admin-1").await;
        next_matching(&mut admin, online("admin-1")).await;

        let http = reqwest::Client::new();
        let resp = http
            .post(format!("http://{}/notifications", addr))
            .json(&json!({
                "title": "New project created",
                "message": "leader@x.com created new project",
                "project": "P1"
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 201);

        let event = next_matching(&mut admin, |e| matches!(e, ServerEvent::NotificationNew(_))).await;
        match event {
            ServerEvent::NotificationNew(p) => {
                assert_eq!(p.project_id.as_deref(), Some("P1"));
                assert_eq!(p.title, "New project created");
            }
            other => panic!("unexpected {:?}", other),
        }

        let list: Vec<serde_json::Value> = http
            .get(format!("http://{}/notifications", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["project"], "P1");
    }

    #[tokio::test]
    async fn test_presence_edges_across_multiple_connections() {
        let state = test_state();
        let addr = spawn_server(state.clone()).await;

        let mut observer = connect_as(addr, "observer").await;
        next_matching(&mut observer, online("observer")).await;

        let mut first = connect_as(addr, "u1").await;
        next_matching(&mut observer, online("u1")).await;
        let mut second = connect_as(addr, "u1").await;
        wait_for_connections(&state, "u1", 2).await;

        first.close(None).await.unwrap();
        drop(first);
        wait_for_connections(&state, "u1", 1).await;
        assert_eq!(state.presence.connection_count("u1"), 1);

        let http = reqwest::Client::new();
        let users: serde_json::Value = http
            .get(format!("http://{}/auth/online-users", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(users["userIds"], json!(["observer", "u1"]));

        second.close(None).await.unwrap();
        drop(second);
        next_matching(&mut observer, offline("u1")).await;
        assert_eq!(state.presence.connection_count("u1"), 0);
        assert_eq!(state.presence.list_online(), vec!["observer".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_abrupt_disconnects_leave_nobody_online() {
        let state = test_state();
        let addr = spawn_server(state.clone()).await;

        let mut clients = Vec::new();
        for i in 0..20 {
            clients.push(tokio::spawn(async move {
                let mut ws = connect_as(addr, &format!("churn-{}", i % 4)).await;
                if i % 2 == 0 {
                    // identify a second time, then vanish without a close frame
                    let again = ClientEvent::Identify(IdentifyPayload {
                        user_id: format!("churn-{}", i % 4),
                    });
                    let _ = ws.send(Message::Text(serde_json::to_string(&again).unwrap())).await;
                    drop(ws);
                } else {
                    let _ = ws.close(None).await;
                }
            }));
        }
        for c in clients {
            c.await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while !state.presence.list_online().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("users left online after every socket closed");
    }

    #[tokio::test]
    async fn test_read_event_only_when_state_changes() {
        let addr = spawn_server(test_state()).await;
        let mut watcher = connect_as(addr, "w").await;
        next_matching(&mut watcher, online("w")).await;

        let http = reqwest::Client::new();
        let created: serde_json::Value = http
            .post(format!("http://{}/notifications", addr))
            .json(&json!({ "title": "Project approved", "message": "ok" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap().to_string();

        let uri = format!("http://{}/notifications/{}/read", addr, id);
        http.patch(&uri).send().await.unwrap();
        http.patch(&uri).send().await.unwrap();
        // a marker after both requests: anything emitted by the second
        // mark-read would arrive before it
        http.post(format!("http://{}/notifications", addr))
            .json(&json!({ "title": "Project rejected", "message": "marker" }))
            .send()
            .await
            .unwrap();

        let mut reads = 0;
        loop {
            let event = next_matching(&mut watcher, |_| true).await;
            match event {
                ServerEvent::NotificationRead(p) => {
                    assert_eq!(p.ids.len(), 1);
                    reads += 1;
                }
                ServerEvent::NotificationNew(p) if p.message == "marker" => break,
                _ => {}
            }
        }
        assert_eq!(reads, 1);
    }
}
