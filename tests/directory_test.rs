mod test_utils;

use huddle_server::error::AppError;
use huddle_server::types::{GroupKind, MessageKind, ParticipantRole};
use test_utils::spawn_app;

#[tokio::test]
async fn concurrent_init_lands_on_one_group() {
    let app = spawn_app().await;

    let (a, b, c) = tokio::join!(
        app.ctx.directory.get_or_create("project-7", "Project 7", "alice"),
        app.ctx.directory.get_or_create("project-7", "Project 7", "bob"),
        app.ctx.directory.get_or_create("project-7", "Project 7", "carol"),
    );
    let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

    assert_eq!(a.id, b.id);
    assert_eq!(b.id, c.id);
    assert_eq!(a.kind, GroupKind::Project);

    // Exactly one caller won the insert and became admin.
    let admins = a
        .participants
        .iter()
        .filter(|p| p.role == ParticipantRole::Admin)
        .count();
    assert_eq!(admins, 1);
}

#[tokio::test]
async fn creator_is_admin_and_members_are_members() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob", "carol"]).await;

    assert_eq!(group.role_of("alice"), Some(ParticipantRole::Admin));
    assert_eq!(group.role_of("bob"), Some(ParticipantRole::Member));
    assert_eq!(group.role_of("carol"), Some(ParticipantRole::Member));
    assert_eq!(group.role_of("stranger"), None);
}

#[tokio::test]
async fn add_participant_is_idempotent() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    let first = app
        .ctx
        .directory
        .add_participant(&group.id, "bob", ParticipantRole::Member)
        .await
        .unwrap();
    let second = app
        .ctx
        .directory
        .add_participant(&group.id, "bob", ParticipantRole::Viewer)
        .await
        .unwrap();

    assert!(first);
    assert!(!second);

    // The original role survives the re-add.
    let role = app.ctx.directory.role_of(&group.id, "bob").await.unwrap();
    assert_eq!(role, Some(ParticipantRole::Member));
}

#[tokio::test]
async fn sole_admin_cannot_be_demoted() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &["bob"]).await;

    let err = app
        .ctx
        .directory
        .set_role(&group.id, "alice", ParticipantRole::Member)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    // With a second admin in place the demotion goes through.
    app.ctx
        .directory
        .set_role(&group.id, "bob", ParticipantRole::Admin)
        .await
        .unwrap();
    app.ctx
        .directory
        .set_role(&group.id, "alice", ParticipantRole::Member)
        .await
        .unwrap();
}

#[tokio::test]
async fn listing_orders_by_recent_activity() {
    let app = spawn_app().await;
    let older = app.seed_group("older", "alice", &[]).await;
    let newer = app.seed_group("newer", "alice", &[]).await;

    // Activity in the older group moves it to the front.
    let message = app
        .ctx
        .store
        .append(&older.id, "alice", "ping", MessageKind::Text, Vec::new())
        .await
        .unwrap();
    app.ctx
        .directory
        .update_last_message(&older.id, &message.id)
        .await
        .unwrap();

    let groups = app.ctx.directory.list_for_user("alice").await.unwrap();
    let names: Vec<&str> = groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["older", "newer"]);
    assert_eq!(groups[0].last_message_id.as_deref(), Some(message.id.as_str()));

    let _ = newer;
}

#[tokio::test]
async fn listing_excludes_archived_groups() {
    let app = spawn_app().await;
    let kept = app.seed_group("kept", "alice", &[]).await;
    let archived = app.seed_group("archived", "alice", &[]).await;

    app.ctx.directory.deactivate(&archived.id).await.unwrap();

    let groups = app.ctx.directory.list_for_user("alice").await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].id, kept.id);
}

#[tokio::test]
async fn deactivating_unknown_group_is_not_found() {
    let app = spawn_app().await;

    let err = app.ctx.directory.deactivate("no-such-group").await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn appends_drive_the_last_message_projection() {
    let app = spawn_app().await;
    let group = app.seed_group("team", "alice", &[]).await;

    let message = app
        .ctx
        .store
        .append(&group.id, "alice", "hello", MessageKind::Text, Vec::new())
        .await
        .unwrap();

    // The projection runs on a background task; poll briefly.
    let mut pointer = None;
    for _ in 0..50 {
        let g = app.ctx.directory.get(&group.id).await.unwrap();
        if g.last_message_id.is_some() {
            pointer = g.last_message_id;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(pointer.as_deref(), Some(message.id.as_str()));
}
