//! Broadcast fan-out drained end to end over traced storage.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeSet;

use serde_json::json;

use sluice_flow::broadcast::{BroadcastEnvelope, BroadcastOutcome};
use sluice_flow::{IoBundle, MessageKey, MessagePrefix, MessageType, SluiceConfig};
use sluice_test_utils::{TestContext, init_test_logging, work_item_id, work_item_ids};

fn bundle(ctx: &TestContext) -> IoBundle {
    IoBundle::from_config(ctx.backend(), &SluiceConfig::new(ctx.root.clone())).expect("bundle")
}

/// Processes pending envelopes until none are left, returning every outcome.
async fn drain(bundle: &IoBundle) -> Vec<BroadcastOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let pending = bundle.broadcaster().pending().await.expect("pending");
        let Some(next) = pending.first() else {
            return outcomes;
        };
        outcomes.push(bundle.broadcaster().process(next).await.expect("process"));
    }
}

#[tokio::test]
async fn small_broadcast_delivers_exact_set() {
    init_test_logging();
    let ctx = TestContext::new();
    let bundle = bundle(&ctx);
    let ids: Vec<_> = ["a", "b", "c"].into_iter().map(work_item_id).collect();

    let envelope = bundle
        .broadcaster()
        .broadcast(MessageType::Cancel, &ids, &json!(""))
        .await
        .expect("broadcast");
    assert_eq!(bundle.broadcaster().pending().await.unwrap(), vec![envelope.to_work_item_id()]);

    let outcome = bundle
        .broadcaster()
        .process(&envelope.to_work_item_id())
        .await
        .expect("process");
    assert_eq!(outcome, BroadcastOutcome::Delivered { count: 3 });

    let delivered: Vec<String> = bundle
        .messages()
        .list(&MessageType::Cancel.into())
        .await
        .unwrap()
        .into_iter()
        .map(|key| key.to_string())
        .collect();
    assert_eq!(delivered, vec!["cancel-a", "cancel-b", "cancel-c"]);
    assert!(bundle.broadcaster().pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn large_broadcast_bisects_and_delivers_each_id_once() {
    let ctx = TestContext::new();
    let bundle = bundle(&ctx);
    let ids = work_item_ids(250);

    bundle
        .broadcaster()
        .broadcast(MessageType::Placed, &ids, &json!({"source": "operator"}))
        .await
        .unwrap();
    let outcomes = drain(&bundle).await;

    let bifurcations = outcomes
        .iter()
        .filter(|o| matches!(o, BroadcastOutcome::Bifurcated { .. }))
        .count();
    let delivered: usize = outcomes
        .iter()
        .map(|o| match o {
            BroadcastOutcome::Delivered { count } => *count,
            _ => 0,
        })
        .sum();
    // 250 -> 125 + 125 -> 62 + 63 + 62 + 63
    assert_eq!(bifurcations, 3);
    assert_eq!(delivered, 250);

    let written = bundle.messages().list(&MessageType::Placed.into()).await.unwrap();
    let unique: BTreeSet<_> = written.iter().map(|key| key.id().clone()).collect();
    assert_eq!(written.len(), 250);
    assert_eq!(unique, ids.into_iter().collect());

    let payload = bundle.messages().get_one(&written[0]).await.unwrap();
    assert_eq!(payload, json!({"source": "operator"}));
}

#[tokio::test]
async fn kill_signal_stops_pending_envelopes() {
    let ctx = TestContext::new();
    let bundle = bundle(&ctx);
    let envelope = bundle
        .broadcaster()
        .broadcast(MessageType::Placed, &work_item_ids(20), &json!(""))
        .await
        .unwrap();

    bundle.broadcaster().kill().await.unwrap();
    let outcome = bundle
        .broadcaster()
        .process(&envelope.to_work_item_id())
        .await
        .unwrap();

    assert_eq!(outcome, BroadcastOutcome::Killed);
    assert!(bundle.broadcaster().pending().await.unwrap().is_empty());
    assert!(bundle.messages().list(&MessageType::Placed.into()).await.unwrap().is_empty());

    let kill_id = bundle.broadcaster().kill_key().id().clone();
    assert_eq!(
        bundle.broadcaster().process(&kill_id).await.unwrap(),
        BroadcastOutcome::Ignored
    );
    assert!(bundle.broadcaster().is_killed().await.unwrap());
}

#[tokio::test]
async fn kill_raised_mid_delivery_interrupts_at_next_check() {
    let ctx = TestContext::new();
    let bundle = bundle(&ctx);
    let kill = bundle.broadcaster().kill_key().clone();

    // The fifth message raises the kill signal itself, so the check after
    // ten deliveries sees it.
    let mut messages: Vec<MessageKey> = work_item_ids(24)
        .into_iter()
        .map(|id| MessageKey::new(MessageType::Placed, id))
        .collect();
    messages.insert(4, kill);
    let envelope_id = work_item_id("manual_envelope");
    let body = serde_json::to_value(BroadcastEnvelope {
        messages,
        payload: json!(""),
    })
    .unwrap();
    bundle
        .messages()
        .put_one(&MessageKey::new(MessageType::Broadcast, envelope_id.clone()), &body)
        .await
        .unwrap();

    let outcome = bundle.broadcaster().process(&envelope_id).await.unwrap();
    assert_eq!(
        outcome,
        BroadcastOutcome::Interrupted {
            delivered: 10,
            remaining: 15
        }
    );
    assert_eq!(
        bundle.messages().list(&MessageType::Placed.into()).await.unwrap().len(),
        9
    );
}

#[tokio::test]
async fn consumed_envelope_is_not_found() {
    let ctx = TestContext::new();
    let bundle = bundle(&ctx);
    let envelope = bundle
        .broadcaster()
        .broadcast(MessageType::Rescue, &work_item_ids(2), &json!(""))
        .await
        .unwrap()
        .to_work_item_id();

    bundle.broadcaster().process(&envelope).await.unwrap();
    let err = bundle.broadcaster().process(&envelope).await.unwrap_err();
    assert!(err.is_not_found());

    bundle
        .messages()
        .delete(&MessagePrefix::Type(MessageType::Rescue))
        .await
        .unwrap();
    assert!(ctx.relative_paths().is_empty());
}
