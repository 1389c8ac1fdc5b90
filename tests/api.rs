mod common;

use axum::http::StatusCode;
use common::{TestApp, votes};
use pollsync::config::Config;
use pollsync::db::{Creator, PollDraft, PollStore};
use pollsync::sse::{POLL_TOPIC, SyncEvent};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

async fn seed(app: &TestApp, count: usize) {
    let creator = Creator {
        id: Uuid::new_v4(),
        name: "seed".into(),
    };
    for i in 0..count {
        app.state
            .store
            .insert(PollDraft::new(format!("poll {i}"), &["a", "b"]), creator.clone())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let app = TestApp::new();
    let mut client = app.anonymous();

    assert_eq!(client.get("/health").await.0, StatusCode::OK);
    assert_eq!(client.get("/nowhere").await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn create_requires_a_session() {
    let app = TestApp::new();
    let mut client = app.anonymous();

    let (status, body) = client
        .post("/polls", json!({"question": "q", "options": [{"text": "a"}]}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");
    assert!(app.state.store.is_empty().await);
}

#[tokio::test]
async fn create_rejects_polls_without_options() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;

    let (status, body) = ada.post("/polls", json!({"question": "q", "options": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");

    let (status, _) = ada.post("/polls", json!({"question": "q"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = ada.post("/polls", json!("not an object")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(app.state.store.is_empty().await);
}

#[tokio::test]
async fn create_assigns_server_fields_and_publishes() {
    let app = TestApp::new();
    let mut events = app.state.broadcaster.subscribe(POLL_TOPIC);
    let mut ada = app.user("ada").await;

    let (status, poll) = ada
        .post(
            "/polls",
            json!({
                "_id": "forged",
                "creator": {"id": Uuid::new_v4(), "name": "mallory"},
                "question": "Best editor?",
                "options": [
                    {"text": "vim", "votes": 40, "color": "#0f0"},
                    {"text": "emacs", "votes": 12, "color": "purple"}
                ]
            }),
        )
        .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_ne!(poll["id"], "forged");
    assert_eq!(poll["creator"]["id"], json!(ada.user_id.unwrap()));
    assert_eq!(poll["creator"]["name"], "ada");
    assert_eq!(votes(&poll), vec![0, 0]);
    assert_eq!(poll["options"][0]["color"], "#0f0");
    assert!(poll["options"][1]["color"].is_null());

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(event, SyncEvent::Created { .. }));
    assert_eq!(event.poll_id().as_str(), poll["id"].as_str().unwrap());
}

#[tokio::test]
async fn show_returns_the_poll_or_not_found() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let id = poll["id"].as_str().unwrap();

    let mut anyone = app.anonymous();
    let (status, shown) = anyone.get(&format!("/polls/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shown, poll);

    let (status, body) = anyone.get("/polls/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Poll not found");
}

#[tokio::test]
async fn listing_clamps_the_window() {
    let app = TestApp::new();
    seed(&app, 55).await;
    let mut client = app.anonymous();

    let (_, polls) = client.get("/polls").await;
    assert_eq!(polls.as_array().unwrap().len(), 20);

    let (_, polls) = client.get("/polls?limit=500").await;
    assert_eq!(polls.as_array().unwrap().len(), 50);

    let (_, polls) = client.get("/polls?limit=-3").await;
    assert_eq!(polls.as_array().unwrap().len(), 1);

    let (status, polls) = client.get("/polls?limit=abc&page=-2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(polls.as_array().unwrap().len(), 20);

    let (_, polls) = client.get("/polls?page=9").await;
    assert!(polls.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn listing_pages_cover_every_poll_once() {
    let app = TestApp::new();
    seed(&app, 45).await;
    let mut client = app.anonymous();

    let mut ids = Vec::new();
    for page in 0..3 {
        let (_, polls) = client.get(&format!("/polls?page={page}&limit=20")).await;
        for poll in polls.as_array().unwrap() {
            assert_eq!(poll["creator"], json!({"name": "seed"}));
            ids.push(poll["id"].as_str().unwrap().to_string());
        }
    }
    assert_eq!(ids.len(), 45);
    assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 45);
}

#[tokio::test]
async fn vote_increments_one_option() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b", "c"]).await;
    let id = poll["id"].as_str().unwrap();

    let mut voter = app.anonymous();
    let (status, updated) = voter.put(&format!("/polls/vote/{id}"), json!({"vote": 2})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(votes(&updated), vec![0, 0, 1]);
}

#[tokio::test]
async fn vote_with_bad_index_changes_nothing() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let id = poll["id"].as_str().unwrap();
    let uri = format!("/polls/vote/{id}");

    for bad in [json!({"vote": 2}), json!({"vote": -1})] {
        let mut voter = app.anonymous();
        let (status, body) = voter.put(&uri, bad).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid vote index");
    }

    let mut voter = app.anonymous();
    let (status, _) = voter.put(&uri, json!({"choice": 0})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, shown) = ada.get(&format!("/polls/{id}")).await;
    assert_eq!(votes(&shown), vec![0, 0]);
}

#[tokio::test]
async fn vote_on_missing_poll_is_not_found() {
    let app = TestApp::new();
    let mut voter = app.anonymous();

    let (status, _) = voter.put("/polls/vote/missing", json!({"vote": 0})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // failed attempts do not use up the vote
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a"]).await;
    let uri = format!("/polls/vote/{}", poll["id"].as_str().unwrap());
    assert_eq!(voter.put(&uri, json!({"vote": 3})).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(voter.put(&uri, json!({"vote": 0})).await.0, StatusCode::CREATED);
}

#[tokio::test]
async fn second_vote_from_the_same_session_is_rejected() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let uri = format!("/polls/vote/{}", poll["id"].as_str().unwrap());

    let mut voter = app.anonymous();
    assert_eq!(voter.put(&uri, json!({"vote": 0})).await.0, StatusCode::CREATED);

    let (status, body) = voter.put(&uri, json!({"vote": 1})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "User already voted on this poll");

    let mut other = app.anonymous();
    let (status, updated) = other.put(&uri, json!({"vote": 1})).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(votes(&updated), vec![1, 1]);
}

#[tokio::test]
async fn ledger_can_be_switched_off() {
    let app = TestApp::with_config(Config {
        vote_token_ttl: Duration::ZERO,
        ..Config::default()
    });
    assert!(app.state.ledger.is_none());

    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a"]).await;
    let uri = format!("/polls/vote/{}", poll["id"].as_str().unwrap());

    for _ in 0..3 {
        assert_eq!(ada.put(&uri, json!({"vote": 0})).await.0, StatusCode::CREATED);
    }
    let (_, shown) = ada.get(&format!("/polls/{}", poll["id"].as_str().unwrap())).await;
    assert_eq!(votes(&shown), vec![3]);
    assert_eq!(shown["voters"], json!([ada.user_id.unwrap()]));
}

#[tokio::test]
async fn my_polls_lists_only_the_callers_polls() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let mut bob = app.user("bob").await;
    ada.create_poll("ada 1", &["a"]).await;
    ada.create_poll("ada 2", &["a"]).await;
    bob.create_poll("bob 1", &["a"]).await;

    let (status, mine) = ada.get("/polls/mypolls").await;
    assert_eq!(status, StatusCode::OK);
    let questions: HashSet<_> = mine
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["question"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(questions, HashSet::from(["ada 1".to_string(), "ada 2".to_string()]));

    assert_eq!(
        app.anonymous().get("/polls/mypolls").await.0,
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn put_replaces_owned_polls_and_keeps_counts() {
    let app = TestApp::new();
    let mut events = app.state.broadcaster.subscribe(POLL_TOPIC);
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let id = poll["id"].as_str().unwrap();
    ada.put(&format!("/polls/vote/{id}"), json!({"vote": 1})).await;

    let (status, updated) = ada
        .put(
            &format!("/polls/{id}"),
            json!({
                "question": "q, revised",
                "options": [{"text": "a"}, {"text": "b", "votes": 100}, {"text": "c"}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["question"], "q, revised");
    assert_eq!(votes(&updated), vec![0, 1, 0]);
    assert_eq!(updated["date"], poll["date"]);

    let names: Vec<_> = [
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
    ]
    .iter()
    .map(|e| e.name())
    .collect();
    assert_eq!(names, vec!["created", "updated", "updated"]);
}

#[tokio::test]
async fn put_creates_missing_polls_and_guards_foreign_ones() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let mut bob = app.user("bob").await;

    let (status, created) = ada
        .put("/polls/chosen-id", json!({"question": "q", "options": [{"text": "a"}]}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["id"], "chosen-id");

    let (status, _) = bob
        .put("/polls/chosen-id", json!({"question": "mine now", "options": [{"text": "x"}]}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = ada.put("/polls/chosen-id", json!({"question": "q", "options": []})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, shown) = ada.get("/polls/chosen-id").await;
    assert_eq!(shown["question"], "q");
}

#[tokio::test]
async fn patch_applies_json_patch_operations() {
    let app = TestApp::new();
    let mut events = app.state.broadcaster.subscribe(POLL_TOPIC);
    let mut ada = app.user("ada").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let id = poll["id"].as_str().unwrap();
    let uri = format!("/polls/{id}");
    ada.put(&format!("/polls/vote/{id}"), json!({"vote": 1})).await;

    let (status, patched) = ada
        .patch(&uri, json!([{"op": "replace", "path": "/question", "value": "x"}]))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(patched["question"], "x");
    assert_eq!(votes(&patched), vec![0, 1]);

    let (status, patched) = ada
        .patch(
            &uri,
            json!([
                {"op": "test", "path": "/question", "value": "x"},
                {"op": "add", "path": "/options/-", "value": {"text": "c", "color": "#123456"}},
                {"op": "add", "path": "/options/1/votes", "value": 99}
            ]),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(votes(&patched), vec![0, 1, 0]);
    assert_eq!(patched["options"][2]["color"], "#123456");

    let (_, shown) = ada.get(&uri).await;
    assert_eq!(shown, patched);

    let names: Vec<_> = [
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
        events.recv().await.unwrap(),
    ]
    .iter()
    .map(|e| e.name())
    .collect();
    assert_eq!(names, vec!["created", "updated", "updated", "updated"]);
}

#[tokio::test]
async fn patch_rejections_leave_the_poll_alone() {
    let app = TestApp::new();
    let mut ada = app.user("ada").await;
    let mut bob = app.user("bob").await;
    let poll = ada.create_poll("q", &["a", "b"]).await;
    let uri = format!("/polls/{}", poll["id"].as_str().unwrap());

    let (status, body) = ada
        .patch(
            &uri,
            json!([
                {"op": "test", "path": "/question", "value": "not q"},
                {"op": "replace", "path": "/question", "value": "x"}
            ]),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid request");

    for bad in [
        json!({"question": "not a patch"}),
        json!([{"op": "explode", "path": "/question"}]),
        json!([{"op": "remove", "path": "/options/5"}]),
        json!([{"op": "replace", "path": "/options", "value": []}]),
    ] {
        assert_eq!(ada.patch(&uri, bad).await.0, StatusCode::BAD_REQUEST);
    }

    let rename = json!([{"op": "replace", "path": "/question", "value": "mine"}]);
    assert_eq!(bob.patch(&uri, rename.clone()).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(
        app.anonymous().patch(&uri, rename.clone()).await.0,
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        ada.patch("/polls/missing", rename).await.0,
        StatusCode::NOT_FOUND
    );

    let (_, shown) = ada.get(&uri).await;
    assert_eq!(shown, poll);
}

#[tokio::test]
async fn delete_is_creator_only() {
    let app = TestApp::new();
    let mut events = app.state.broadcaster.subscribe(POLL_TOPIC);
    let mut ada = app.user("ada").await;
    let mut bob = app.user("bob").await;
    let poll = ada.create_poll("q", &["a"]).await;
    let id = poll["id"].as_str().unwrap();
    let uri = format!("/polls/{id}");

    assert_eq!(bob.delete(&uri).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(app.anonymous().delete(&uri).await.0, StatusCode::UNAUTHORIZED);

    let (status, body) = ada.delete(&uri).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert_eq!(ada.get(&uri).await.0, StatusCode::NOT_FOUND);
    assert_eq!(ada.delete(&uri).await.0, StatusCode::NOT_FOUND);

    events.recv().await.unwrap();
    let removed = events.recv().await.unwrap();
    assert!(matches!(removed, SyncEvent::Removed { .. }));
    assert_eq!(removed.poll_id().as_str(), id);
}
