use std::time::Duration;

use chatty_client::screens::conversation_rows;
use chatty_client::{Action, AppShell, Phase};
use chatty_common::{GroupId, UserId};

use chatty_client_integration::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shell_keeps_conversation_list_live() {
    tracing_subscriber::fmt::try_init().ok();
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let mut shell = AppShell::new(ada.ctx.clone());
    shell.sync().await.unwrap();
    ada.settle().await;
    assert_eq!(shell.phase(), Phase::LoggedInSubscribed);

    let posted = node.store.create_message(GroupId(2), UserId(3), "lunch?").unwrap();
    assert!(
        ada.wait_for(|ctx| {
            conversation_rows(&ctx.cache, UserId(1))
                .iter()
                .any(|row| row.group_id == GroupId(2) && row.preview_text.as_deref() == Some("lunch?"))
        })
        .await,
        "preview not updated"
    );
    assert_eq!(posted.to.id, GroupId(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn joining_a_group_extends_the_message_feed() {
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let mut shell = AppShell::new(ada.ctx.clone());
    shell.sync().await.unwrap();
    ada.settle().await;

    let ops = node.store.add_group("ops", None, &[UserId(1), UserId(2)]).unwrap();
    assert!(
        ada.wait_for(|ctx| conversation_rows(&ctx.cache, UserId(1)).len() == 3).await,
        "new group never listed"
    );
    shell.sync().await.unwrap();
    ada.settle().await;

    node.store.create_message(ops.id, UserId(2), "welcome").unwrap();
    assert!(
        ada.wait_for(|ctx| {
            conversation_rows(&ctx.cache, UserId(1))
                .iter()
                .any(|row| row.group_id == ops.id && row.preview_text.as_deref() == Some("welcome"))
        })
        .await,
        "message feed does not cover the new group"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logout_ends_every_feed() {
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let mut shell = AppShell::new(ada.ctx.clone());
    shell.sync().await.unwrap();
    assert_eq!(ada.transport.live_feeds(), 2);
    assert_eq!(ada.transport.hub().listener_count(), 1);

    ada.ctx.store.dispatch(Action::LoggedOut);
    shell.sync().await.unwrap();
    assert_eq!(shell.phase(), Phase::LoggedOut);

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while ada.transport.live_feeds() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ada.transport.live_feeds(), 0);
    assert_eq!(ada.transport.hub().listener_count(), 0);
}
