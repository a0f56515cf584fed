mod test_utils;

use reqwest::StatusCode;
use serde_json::{json, Value};

use huddle_server::types::ParticipantRole;
use test_utils::{spawn_app, TestApp};

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn get_json(app: &TestApp, path: &str, user: &str) -> (StatusCode, Value) {
    let resp = client()
        .get(format!("{}{}", app.http_url, path))
        .bearer_auth(app.token_for(user))
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

async fn post_json(app: &TestApp, path: &str, user: &str, body: &Value) -> (StatusCode, Value) {
    let resp = client()
        .post(format!("{}{}", app.http_url, path))
        .bearer_auth(app.token_for(user))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.json().await.unwrap())
}

#[tokio::test]
async fn health_reports_ok() {
    let app = spawn_app().await;

    let resp = client()
        .get(format!("{}/health", app.http_url))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn history_requires_a_token() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    let resp = client()
        .get(format!("{}/chat/{}/messages", app.http_url, group.id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client()
        .get(format!("{}/chat/{}/messages", app.http_url, group.id))
        .header("Authorization", "Bearer not-a-real-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn rest_post_then_paged_history() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    for i in 1..=3 {
        let (status, body) = post_json(
            &app,
            &format!("/chat/{}/messages", group.id),
            "alice",
            &json!({ "text": format!("message {}", i) }),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["senderId"], "alice");
    }

    let (status, body) = get_json(
        &app,
        &format!("/chat/{}/messages?page=1&limit=2", group.id),
        "alice",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["results"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["totalPages"], 2);
    // Newest page, chronological inside the page.
    assert_eq!(body["data"][0]["body"], "message 2");
    assert_eq!(body["data"][1]["body"], "message 3");
}

#[tokio::test]
async fn non_participant_cannot_post_over_rest() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    let (status, body) = post_json(
        &app,
        &format!("/chat/{}/messages", group.id),
        "mallory",
        &json!({ "text": "let me in" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "FORBIDDEN");
}

#[tokio::test]
async fn viewers_cannot_post_over_rest() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob"]).await;
    app.ctx
        .directory
        .set_role(&group.id, "bob", ParticipantRole::Viewer)
        .await
        .unwrap();

    let (status, _) = post_json(
        &app,
        &format!("/chat/{}/messages", group.id),
        "bob",
        &json!({ "text": "read only" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_and_list_groups() {
    let app = spawn_app().await;

    let (status, body) = post_json(
        &app,
        "/chat/groups",
        "alice",
        &json!({ "name": "design", "participants": ["bob"] }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let group_id = body["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(body["data"]["name"], "design");

    // Both the creator and the invited member see the group.
    for user in ["alice", "bob"] {
        let (status, body) = get_json(&app, "/chat/groups", user).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"], 1);
        assert_eq!(body["data"][0]["id"], group_id.as_str());
    }
}

#[tokio::test]
async fn group_creation_rejects_an_empty_name() {
    let app = spawn_app().await;

    let (status, body) = post_json(&app, "/chat/groups", "alice", &json!({ "name": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn init_is_idempotent_and_adds_later_callers() {
    let app = spawn_app().await;

    let (status, first) = post_json(
        &app,
        "/chat/groups/init",
        "alice",
        &json!({ "linkKey": "project-42" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, second) = post_json(
        &app,
        "/chat/groups/init",
        "bob",
        &json!({ "linkKey": "project-42" }),
    )
    .await;

    assert_eq!(first["data"]["id"], second["data"]["id"]);
    // Bob was folded into the existing group as a member.
    let participants = second["data"]["participants"].as_array().unwrap();
    assert!(participants.iter().any(|p| p["userId"] == "bob"));
}

#[tokio::test]
async fn only_admins_manage_participants() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob"]).await;

    let (status, _) = post_json(
        &app,
        &format!("/chat/groups/{}/participants", group.id),
        "bob",
        &json!({ "userId": "carol" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post_json(
        &app,
        &format!("/chat/groups/{}/participants", group.id),
        "alice",
        &json!({ "userId": "carol" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["added"], true);

    // Re-adding reports no change.
    let (_, body) = post_json(
        &app,
        &format!("/chat/groups/{}/participants", group.id),
        "alice",
        &json!({ "userId": "carol" }),
    )
    .await;
    assert_eq!(body["added"], false);
}

#[tokio::test]
async fn archive_closes_the_group_for_posting() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    let (status, _) = post_json(
        &app,
        &format!("/chat/groups/{}/archive", group.id),
        "alice",
        &json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        &app,
        &format!("/chat/{}/messages", group.id),
        "alice",
        &json!({ "text": "too late" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // History stays readable after archival.
    let (status, _) = get_json(&app, &format!("/chat/{}/messages", group.id), "alice").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn settings_update_gates_reactions() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob"]).await;

    let (_, posted) = post_json(
        &app,
        &format!("/chat/{}/messages", group.id),
        "alice",
        &json!({ "text": "react away" }),
    )
    .await;
    let message_id = posted["data"]["id"].as_str().unwrap().to_string();

    let (status, _) = post_json(
        &app,
        &format!("/chat/groups/{}/settings", group.id),
        "alice",
        &json!({
            "allowAttachments": true,
            "allowReactions": false,
            "adminsOnlyPosting": false
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post_json(
        &app,
        &format!("/chat/messages/{}/reactions", message_id),
        "bob",
        &json!({ "emoji": "👍" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn reactions_and_read_markers_over_rest() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob"]).await;

    let (_, posted) = post_json(
        &app,
        &format!("/chat/{}/messages", group.id),
        "alice",
        &json!({ "text": "mark me" }),
    )
    .await;
    let message_id = posted["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = post_json(
        &app,
        &format!("/chat/messages/{}/reactions", message_id),
        "bob",
        &json!({ "emoji": "🎉" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["emoji"], "🎉");

    let (status, _) = post_json(
        &app,
        &format!("/chat/messages/{}/read", message_id),
        "bob",
        &json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, history) = get_json(&app, &format!("/chat/{}/messages", group.id), "alice").await;
    assert_eq!(history["data"][0]["reactions"][0]["userId"], "bob");
    assert_eq!(history["data"][0]["readBy"][0]["userId"], "bob");
}
