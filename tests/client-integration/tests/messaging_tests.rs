use std::collections::BTreeSet;

use chatty_client::ClientError;
use chatty_common::{GroupId, MessageId, UserId};

use chatty_client_integration::*;

const RUST: GroupId = GroupId(1);

fn page_ids(client: &Client) -> Vec<MessageId> {
    client.ctx.cache.read_group(RUST).map(|g| g.messages.iter().map(|m| m.id).collect()).unwrap_or_default()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn sent_message_is_shown_then_confirmed_once() {
    tracing_subscriber::fmt::try_init().ok();
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let screen = ada.open(RUST).await;
    let before = page_ids(&ada);
    assert_eq!(before.len(), 10);

    let (sent, pending_head) = tokio::join!(screen.send("hello from ada"), async {
        let view = screen.view().expect("loaded");
        (view.rows[0].pending, view.rows[0].text.clone())
    });
    assert_eq!(pending_head, (true, "hello from ada".to_string()));

    let sent = sent.expect("send confirmed");
    assert!(!sent.id.is_optimistic());
    assert!(
        ada.wait_for(|ctx| ctx.cache.pending_mutations() == 0).await,
        "optimistic layer not released"
    );

    let after = page_ids(&ada);
    assert_eq!(after[0], sent.id);
    assert_eq!(&after[1..], &before[..]);
    let unique: BTreeSet<_> = after.iter().collect();
    assert_eq!(unique.len(), after.len(), "duplicate message ids: {after:?}");

    let listed = ada.ctx.cache.read_user(UserId(1)).expect("user cached");
    assert_eq!(listed.groups[0].messages[0].id, sent.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn older_pages_are_appended_until_exhausted() {
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let screen = ada.open(RUST).await;

    assert_eq!(screen.load_more().await.unwrap(), 2);
    let all = page_ids(&ada);
    assert_eq!(all.len(), 12);
    assert!(all.windows(2).all(|pair| pair[0] > pair[1]), "not newest first: {all:?}");

    assert_eq!(screen.load_more().await.unwrap(), 0);
    assert_eq!(page_ids(&ada), all);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn messages_from_others_arrive_live() {
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    let grace = node.connect(UserId(2)).await;
    let _ada_screen = ada.open(RUST).await;
    let grace_screen = grace.open(RUST).await;

    let sent = grace_screen.send("hi ada").await.unwrap();
    assert!(
        ada.wait_for(|ctx| ctx.cache.read_group(RUST).is_some_and(|g| g.messages[0].id == sent.id)).await,
        "message never reached ada"
    );
    let ids = page_ids(&ada);
    assert_eq!(ids.iter().filter(|id| **id == sent.id).count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn opening_a_conversation_marks_it_read() {
    let node = TestNode::start().await;
    let ada = node.connect(UserId(1)).await;
    assert_eq!(node.store.group(RUST, 0, 1).unwrap().unread_count, 12);

    let screen = ada.open(RUST).await;
    let head = page_ids(&ada)[0];
    let server = node.store.group(RUST, 0, 1).unwrap();
    assert_eq!(server.last_read, Some(head));
    assert_eq!(server.unread_count, 0);
    assert_eq!(screen.view().unwrap().unread_count, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rejected_send_is_rolled_back() {
    let node = TestNode::start().await;
    let linus = node.connect(UserId(3)).await;
    let screen = linus.open(RUST).await;
    let before = page_ids(&linus);

    let err = screen.send("let me in").await.unwrap_err();
    assert!(matches!(err, ClientError::Server(ref message) if message.contains("not a member")), "{err}");
    assert_eq!(page_ids(&linus), before);
    assert_eq!(linus.ctx.cache.pending_mutations(), 0);
}
