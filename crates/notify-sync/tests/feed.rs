//! Live feeds: first paint, live updates, shared subscriptions, teardown

use notify_model::RecipientRole;
use notify_sync::{FeedHandle, FeedView, StoreError, SyncConfig, SyncError};
use notify_test_utils::{club_doc, ids, legacy_doc, nid, student_doc, user, Fixture, COLLECTION};
use pretty_assertions::assert_eq;
use std::time::Duration;

const CLUB: RecipientRole = RecipientRole::Club;

async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached");
}

async fn wait(feed: &mut FeedHandle, pred: impl Fn(&FeedView) -> bool) -> FeedView {
    tokio::time::timeout(Duration::from_secs(5), feed.wait_for(pred))
        .await
        .expect("feed did not reach the expected view")
        .unwrap()
}

#[tokio::test]
async fn feed_goes_live_and_follows_remote_changes() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1), legacy_doc("old", "c1", 0)]);
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    let view = wait(&mut feed, |v| !v.stale).await;
    assert_eq!(ids(&view.notifications), ["a", "old"]);
    eventually(|| center.multiplexer().live_subscriptions() == 2).await;

    fx.remote.insert(COLLECTION, club_doc("b", "c1", 5));
    let view = wait(&mut feed, |v| v.len() == 3).await;
    assert_eq!(ids(&view.notifications), ["b", "a", "old"]);
    assert_eq!(view.unread, 3);
}

#[tokio::test]
async fn cached_list_paints_first() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    let center = fx.center();
    center.list(&user("c1"), CLUB).await;

    let feed = center.open_feed(&user("c1"), CLUB).await;
    let first = feed.view();
    assert!(first.stale);
    assert_eq!(ids(&first.notifications), ["a"]);
}

#[tokio::test]
async fn feeds_for_one_identity_share_subscriptions() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    let center = fx.center();

    let mut first = center.open_feed(&user("c1"), CLUB).await;
    let mut second = center.open_feed(&user("c1"), CLUB).await;
    eventually(|| center.multiplexer().signatures().len() == 2).await;
    eventually(|| {
        center
            .multiplexer()
            .signatures()
            .iter()
            .all(|s| center.multiplexer().listener_count(s) == 2)
    })
    .await;
    assert_eq!(fx.remote.subscribe_calls(), 2);

    first.close();
    assert_eq!(fx.remote.cancel_calls(), 0);
    assert_eq!(center.open_feeds(), 1);

    second.close();
    assert_eq!(fx.remote.cancel_calls(), 2);
    assert_eq!(fx.remote.live_subscriptions(), 0);
}

#[tokio::test]
async fn dropping_the_handle_releases_listeners() {
    let fx = Fixture::new();
    fx.seed([student_doc("s", "u1", 1)]);
    let center = fx.center();

    let feed = center.open_feed(&user("u1"), RecipientRole::Student).await;
    eventually(|| center.multiplexer().live_subscriptions() == 1).await;
    drop(feed);
    assert_eq!(center.multiplexer().live_subscriptions(), 0);
    assert_eq!(fx.remote.cancel_calls(), 1);
}

#[tokio::test]
async fn mark_read_reaches_open_feeds_without_a_remote_echo() {
    let fx = Fixture::with_config(SyncConfig::default().with_mark_read_retry(1, Duration::ZERO));
    fx.seed([club_doc("a", "c1", 1), club_doc("b", "c1", 2)]);
    fx.remote.fail_updates(StoreError::unavailable("offline"));
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    wait(&mut feed, |v| !v.stale && v.unread == 2).await;

    assert!(center.mark_read(&nid("a"), &user("c1"), CLUB).await);
    let view = wait(&mut feed, |v| v.unread == 1).await;
    assert!(view.notifications.iter().any(|n| n.id == nid("a") && n.read));
}

#[tokio::test]
async fn read_items_stay_read_when_the_remote_flag_regresses() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    wait(&mut feed, |v| !v.stale).await;
    eventually(|| center.multiplexer().live_subscriptions() == 2).await;

    assert!(center.mark_read(&nid("a"), &user("c1"), CLUB).await);
    wait(&mut feed, |v| v.unread == 0).await;

    // another device resets the flag
    fx.remote.insert(COLLECTION, club_doc("a", "c1", 1));
    fx.remote.insert(COLLECTION, club_doc("z", "c1", 9));
    let view = wait(&mut feed, |v| v.len() == 2).await;
    assert_eq!(view.unread, 1);
    assert!(view.notifications.iter().any(|n| n.id == nid("a") && n.read));
}

#[tokio::test]
async fn live_errors_mark_the_feed_stale_and_recover() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    wait(&mut feed, |v| !v.stale).await;
    eventually(|| center.multiplexer().live_subscriptions() == 2).await;

    fx.remote.push_error(COLLECTION, &StoreError::unavailable("offline"));
    let view = wait(&mut feed, |v| v.stale).await;
    assert_eq!(ids(&view.notifications), ["a"]);

    fx.remote.push(COLLECTION);
    wait(&mut feed, |v| !v.stale).await;
}

#[tokio::test]
async fn legacy_subscription_denied_still_goes_live() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    fx.remote.fail_subscriptions(
        |q| !q.filters.iter().any(|f| f.field == "recipientRole"),
        StoreError::permission_denied("missing field rule"),
    );
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    eventually(|| center.multiplexer().live_subscriptions() == 1).await;
    fx.remote.insert(COLLECTION, club_doc("b", "c1", 2));
    let view = wait(&mut feed, |v| v.len() == 2 && !v.stale).await;
    assert_eq!(ids(&view.notifications), ["b", "a"]);
}

#[tokio::test]
async fn closed_feed_reports_closed() {
    let fx = Fixture::new();
    let center = fx.center();
    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    feed.close();
    assert!(feed.is_closed());
    assert!(matches!(feed.changed().await, Err(SyncError::FeedClosed)));
}

#[tokio::test]
async fn shutdown_closes_every_feed() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1), student_doc("s", "u1", 1)]);
    let center = fx.center();

    let club = center.open_feed(&user("c1"), CLUB).await;
    let student = center.open_feed(&user("u1"), RecipientRole::Student).await;
    eventually(|| center.multiplexer().live_subscriptions() == 3).await;

    center.shutdown();
    assert!(club.is_closed());
    assert!(student.is_closed());
    assert_eq!(fx.remote.live_subscriptions(), 0);
}

#[tokio::test]
async fn live_feed_matches_the_list_beyond_the_window() {
    let fx = Fixture::new();
    fx.seed((0..150).map(|i| club_doc(&format!("n{i:03}"), "c1", i)));
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    wait(&mut feed, |v| !v.stale).await;
    eventually(|| center.multiplexer().live_subscriptions() == 2).await;

    fx.remote.insert(COLLECTION, club_doc("n150", "c1", 150));
    let view = wait(&mut feed, |v| v.notifications.first().is_some_and(|n| n.id == nid("n150"))).await;
    let list = center.list(&user("c1"), CLUB).await;
    assert_eq!(ids(&view.notifications), ids(&list.notifications));
    assert_eq!(view.unread, list.unread);
    assert_eq!(view.len(), 100);
}

#[tokio::test]
async fn feed_goes_live_while_the_index_builds() {
    let fx = Fixture::new();
    fx.seed([club_doc("a", "c1", 1)]);
    fx.remote.set_index_building(true);
    let center = fx.center();

    let mut feed = center.open_feed(&user("c1"), CLUB).await;
    eventually(|| center.multiplexer().live_subscriptions() == 2).await;
    fx.remote.insert(COLLECTION, club_doc("b", "c1", 2));
    let view = wait(&mut feed, |v| v.len() == 2 && !v.stale).await;
    assert_eq!(ids(&view.notifications), ["b", "a"]);
}
