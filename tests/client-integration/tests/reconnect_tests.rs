use std::time::Duration;

use chatty_client::screens::conversation_rows;
use chatty_client::AppShell;
use chatty_common::{GroupId, UserId};

use chatty_client_integration::*;

const GENERAL: GroupId = GroupId(2);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_connection_resubscribes_and_refetches() {
    tracing_subscriber::fmt::try_init().ok();
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let mut shell = AppShell::new(ada.ctx.clone());
    shell.sync().await.unwrap();
    ada.settle().await;
    assert_eq!(ada.transport.live_feeds(), 2);

    // Renames are not broadcast, so only a fresh user query can see this one.
    node.store.update_group(GENERAL, "renamed", None).unwrap();
    assert_eq!(node.drop_connections(), 1);
    assert!(
        ada.wait_for(|ctx| {
            conversation_rows(&ctx.cache, UserId(1)).iter().any(|row| row.group_id == GENERAL && row.name == "renamed")
        })
        .await,
        "user data not refetched after reconnect"
    );
    assert!(ada.transport.is_connected());
    assert_eq!(ada.transport.live_feeds(), 2);

    node.store.create_message(GENERAL, UserId(3), "still there?").unwrap();
    assert!(
        ada.wait_for(|ctx| {
            conversation_rows(&ctx.cache, UserId(1))
                .iter()
                .any(|row| row.group_id == GENERAL && row.preview_text.as_deref() == Some("still there?"))
        })
        .await,
        "message feed not restored after reconnect"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn requests_made_while_offline_are_sent_after_reconnect() {
    let mut node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;

    node.stop().await;
    assert!(ada.wait_disconnected().await, "drop not noticed");

    let query = tokio::spawn({
        let ctx = ada.ctx.clone();
        async move { ctx.fetch_user(UserId(1)).await }
    });
    // Long enough for several refused reconnect attempts.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!query.is_finished(), "queued request failed while offline");

    node.restart().await;
    let user = tokio::time::timeout(TIMEOUT, query)
        .await
        .expect("request never answered")
        .unwrap()
        .expect("request failed")
        .expect("user missing");
    assert_eq!(user.username, "ada");
    assert!(ada.transport.is_connected());
}
