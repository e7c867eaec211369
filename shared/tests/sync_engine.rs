use std::sync::Arc;
use std::time::Duration;

use profile_sync::capabilities::MemoryKvStore;
use profile_sync::model::{MetricsSnapshot, Notification, NotificationId, Presence};
use profile_sync::testing::{FakeGeocoder, FakeGeolocation, FakeRemoteService};
use profile_sync::{
    Capabilities, Profile, ProfileId, ProfilePatch, StreamSlot, SyncConfig, SyncEngine,
    UnixTimeMs,
};

fn engine_with(remote: Arc<FakeRemoteService>) -> Arc<SyncEngine> {
    let caps = Capabilities::new(
        remote,
        Arc::new(FakeGeocoder::new()),
        Arc::new(FakeGeolocation::prompting()),
        Arc::new(MemoryKvStore::new()),
    );
    Arc::new(SyncEngine::new(caps, SyncConfig::default()))
}

fn profile(id: &str, presence: Option<Presence>) -> Profile {
    let mut p = Profile::new(id, format!("Profile {id}"));
    p.email = Some(format!("{id}@example.com"));
    p.presence = presence;
    p
}

fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: NotificationId::new(id),
        kind: "comment".into(),
        title: format!("Notification {id}"),
        body: String::new(),
        read,
        created_at: UnixTimeMs(0),
    }
}

#[tokio::test(start_paused = true)]
async fn test_listings_are_ordered_online_first() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![
        profile("1", Some(Presence::Offline)),
        profile("2", None),
    ]));
    let engine = engine_with(remote);

    engine.watch_listings();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let ids: Vec<_> = engine
        .view(UnixTimeMs(0))
        .listings
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec!["2", "1"]);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_unwatch_before_first_response_applies_nothing() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile("1", None)]));
    remote.set_latency(Duration::from_secs(2));
    let engine = engine_with(Arc::clone(&remote));

    engine.watch_listings();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(remote.read_calls(), 1);
    engine.unwatch(StreamSlot::Listings);
    assert!(!engine.is_watching(StreamSlot::Listings));

    tokio::time::sleep(Duration::from_secs(60)).await;
    let view = engine.view(UnixTimeMs(0));
    assert!(view.listings.is_empty());
    assert!(view.stream_errors.is_empty());
    assert_eq!(remote.read_calls(), 1);
}

#[tokio::test]
async fn test_failed_presence_toggle_restores_snapshot_exactly() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile(
        "1",
        Some(Presence::Offline),
    )]));
    let engine = engine_with(Arc::clone(&remote));
    engine.load_profile_by_email("1@example.com").await.unwrap();

    let before = serde_json::to_vec(&engine.view(UnixTimeMs(0)).profile).unwrap();
    remote.set_fail_writes(true);

    let err = engine
        .toggle_presence(&ProfileId::new("1"), true)
        .await
        .unwrap_err();

    let view = engine.view(UnixTimeMs(0));
    assert_eq!(serde_json::to_vec(&view.profile).unwrap(), before);
    assert_eq!(err.seq, 1);
    assert_eq!(view.error, Some(err));
    assert_eq!(remote.write_calls(), 1);
}

#[tokio::test]
async fn test_successful_edit_keeps_server_value() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile("1", None)]));
    let engine = engine_with(Arc::clone(&remote));
    engine.load_profile_by_email("1@example.com").await.unwrap();

    let patch = ProfilePatch {
        name: Some("  Bia  ".into()),
        ..ProfilePatch::default()
    };
    let confirmed = engine
        .update_profile(&ProfileId::new("1"), patch)
        .await
        .unwrap();

    assert_eq!(confirmed.name, "Bia");
    let detail = engine.view(UnixTimeMs(0)).profile.unwrap();
    assert_eq!(detail.card.name, "Bia");
}

#[tokio::test(start_paused = true)]
async fn test_mutations_on_one_profile_run_one_at_a_time() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile(
        "1",
        Some(Presence::Offline),
    )]));
    let engine = engine_with(Arc::clone(&remote));
    engine.load_profile_by_email("1@example.com").await.unwrap();
    remote.set_latency(Duration::from_secs(1));

    let first = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.toggle_presence(&ProfileId::new("1"), true).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = engine
        .toggle_presence(&ProfileId::new("1"), false)
        .await
        .unwrap();
    let first = first.await.unwrap().unwrap();

    assert_eq!(first.presence, Some(Presence::Online));
    assert_eq!(second.presence, Some(Presence::Offline));
    assert_eq!(remote.write_calls(), 2);
    let view = engine.view(UnixTimeMs::now());
    assert!(!view.profile.unwrap().card.online);
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_rating_leaves_metrics_alone() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile("1", None)]));
    let id = ProfileId::new("1");
    let metrics = MetricsSnapshot {
        views_today: 12,
        contact_clicks_today: 3,
        rating_average: 4.5,
        rating_count: 8,
        estimated_monthly_earnings: 1500.0,
    };
    remote.set_metrics(&id, metrics.clone());
    let engine = engine_with(Arc::clone(&remote));

    engine.watch_metrics(&id);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.view(UnixTimeMs(0)).metrics, Some(metrics.clone()));

    for value in [0, 6] {
        let err = engine.submit_rating(&id, value).await.unwrap_err();
        assert_eq!(err.code, "VALIDATION_ERROR");
    }

    assert_eq!(remote.write_calls(), 0);
    assert!(remote.ratings().is_empty());
    assert_eq!(engine.view(UnixTimeMs(0)).metrics, Some(metrics));
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_read_notifications_stay_read_across_refreshes() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile("1", None)]));
    let id = ProfileId::new("1");
    remote.set_notifications(&id, vec![notification("n1", false)]);
    let engine = engine_with(Arc::clone(&remote));

    engine.watch_notifications(&id);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(engine.view(UnixTimeMs(0)).unread_notifications, 1);

    engine.mark_notifications_read(&id).await.unwrap();
    assert_eq!(engine.view(UnixTimeMs(0)).unread_notifications, 0);

    // A lagging server still reports n1 as unread.
    remote.set_notifications(&id, vec![notification("n2", false), notification("n1", false)]);
    tokio::time::sleep(Duration::from_secs(30)).await;

    let view = engine.view(UnixTimeMs(0));
    let flags: Vec<_> = view
        .notifications
        .iter()
        .map(|n| (n.id.as_str().to_string(), n.read))
        .collect();
    assert_eq!(flags, vec![("n2".to_string(), false), ("n1".to_string(), true)]);
    assert_eq!(view.unread_notifications, 1);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_comment_shows_before_next_refresh_without_duplicates() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile("1", None)]));
    let id = ProfileId::new("1");
    let engine = engine_with(Arc::clone(&remote));

    engine.watch_profile(&id);
    tokio::time::sleep(Duration::from_millis(10)).await;

    let created = engine.submit_comment(&id, "Rita", "Great!").await.unwrap();
    let comments = engine.view(UnixTimeMs(0)).profile.unwrap().comments;
    assert_eq!(comments.len(), 1);

    tokio::time::sleep(Duration::from_secs(15)).await;
    let comments = engine.view(UnixTimeMs(0)).profile.unwrap().comments;
    assert_eq!(comments.len(), 1);
    assert_eq!(comments[0].id, created.id);
    engine.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_toggle_does_not_block_refreshes() {
    let remote = Arc::new(FakeRemoteService::with_profiles(vec![profile(
        "1",
        Some(Presence::Offline),
    )]));
    let id = ProfileId::new("1");
    let engine = engine_with(Arc::clone(&remote));
    engine.load_profile_by_email("1@example.com").await.unwrap();
    remote.set_latency(Duration::from_secs(5));

    let abandoned =
        tokio::time::timeout(Duration::from_secs(1), engine.toggle_presence(&id, true)).await;
    assert!(abandoned.is_err());
    let card = engine.view(UnixTimeMs::now()).profile.unwrap().card;
    assert!(!card.online);

    remote.set_latency(Duration::ZERO);
    let mut renamed = profile("1", Some(Presence::Offline));
    renamed.name = "Ana Maria".into();
    remote.upsert_profile(renamed);

    engine.watch_profile(&id);
    engine.watch_listings();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let view = engine.view(UnixTimeMs::now());
    let detail = view.profile.unwrap();
    assert_eq!(detail.card.name, "Ana Maria");
    assert!(!detail.card.online);
    assert_eq!(view.listings[0].name, "Ana Maria");
    engine.shutdown();
}
