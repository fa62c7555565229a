//! Remote procedure calls over direct and multi-hop routes.

use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use hashnet_node::{Call, Handler};

use crate::harness::{test_config, TestNet};

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;

/// A-B-C line with the greeting procedure registered on A.
async fn greeting_net() -> TestNet {
    let net = TestNet::new(3, test_config(100, 1000));
    net.connect(A, B, 5).await;
    net.connect(B, C, 5).await;
    net.peer(A)
        .add_procedure(
            "test",
            Handler::sync(|data, _| {
                Ok(json!(format!("Hello, {}!", data.as_str().unwrap_or_default())))
            }),
        )
        .await;
    net.settle(300).await;
    net
}

#[tokio::test(start_paused = true)]
async fn test_same_result_locally_and_remotely() {
    let net = greeting_net().await;
    let call = |from: usize| {
        let peer = net.peer(from).clone();
        let target = net.id(A);
        async move {
            peer.call_procedure(Call::new("test").to(target).with_data(json!("world")))
                .await
                .unwrap()
        }
    };

    let local = call(A).await;
    let one_hop = call(B).await;
    let two_hops = call(C).await;
    assert_eq!(local, Some(json!("Hello, world!")));
    assert_eq!(one_hop, local);
    assert_eq!(two_hops, local);
    net.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_discovery_procedure_lists_names() {
    let net = greeting_net().await;
    let names = net
        .peer(C)
        .call_procedure(Call::new("discovery.procedure").to(net.id(A)))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        names,
        json!(["discovery.connection", "discovery.procedure", "ping", "test"])
    );
    net.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_unknown_procedure_answers_null() {
    let net = greeting_net().await;
    let result = net
        .peer(C)
        .call_procedure(Call::new("missing").to(net.id(A)))
        .await
        .unwrap();
    assert_eq!(result, Some(Value::Null));
    net.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_fire_and_forget() {
    let net = greeting_net().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    net.peer(C)
        .add_procedure(
            "notify",
            Handler::sync(move |data, _| {
                let _ = tx.send(data);
                Ok(Value::Null)
            }),
        )
        .await;

    let result = net
        .peer(A)
        .call_procedure(Call::new("notify").to(net.id(C)).with_data(json!(7)).no_response())
        .await
        .unwrap();
    assert_eq!(result, None);
    assert_eq!(rx.recv().await, Some(json!(7)));
    net.shutdown_all().await;
}

/// A handler slower than the timeout resolves the call to `None`; its late
/// answer is discarded and the link keeps working.
#[tokio::test(start_paused = true)]
async fn test_slow_handler_times_out() {
    let net = greeting_net().await;
    net.peer(B)
        .add_procedure(
            "slow",
            Handler::new(|_, _| async {
                tokio::time::sleep(Duration::from_millis(1500)).await;
                Ok::<_, hashnet_node::procedure::HandlerError>(json!("late"))
            }),
        )
        .await;

    let start = tokio::time::Instant::now();
    let result = net
        .peer(A)
        .call_procedure(Call::new("slow").to(net.id(B)))
        .await
        .unwrap();
    assert_eq!(result, None);
    assert!(start.elapsed() >= Duration::from_millis(1000));

    net.settle(1000).await;
    let again = net
        .peer(A)
        .call_procedure(Call::new("test").to(net.id(A)).with_data(json!("again")))
        .await
        .unwrap();
    assert_eq!(again, Some(json!("Hello, again!")));
    let remote = net
        .peer(C)
        .call_procedure(Call::new("test").to(net.id(A)).with_data(json!("still")))
        .await
        .unwrap();
    assert_eq!(remote, Some(json!("Hello, still!")));
    net.shutdown_all().await;
}

/// A failing handler yields `null` to the caller and leaves the pipeline's
/// later handlers running.
#[tokio::test(start_paused = true)]
async fn test_failing_handler_isolated() {
    let net = greeting_net().await;
    net.peer(B)
        .add_procedure("flaky", Handler::sync(|_, _| Err("broken".into())))
        .await;
    net.peer(B)
        .add_procedure("flaky", Handler::sync(|_, previous| Ok(json!({ "previous": previous }))))
        .await;
    net.peer(B)
        .add_procedure("panics", Handler::sync(|_, _| panic!("handler bug")))
        .await;

    let flaky = net
        .peer(A)
        .call_procedure(Call::new("flaky").to(net.id(B)))
        .await
        .unwrap();
    assert_eq!(flaky, Some(json!({ "previous": null })));

    let panics = net
        .peer(A)
        .call_procedure(Call::new("panics").to(net.id(B)))
        .await
        .unwrap();
    assert_eq!(panics, Some(Value::Null));
    net.shutdown_all().await;
}

#[tokio::test(start_paused = true)]
async fn test_removed_procedure_answers_null() {
    let net = greeting_net().await;
    let handler = Handler::sync(|_, _| Ok(json!("here")));
    net.peer(B).add_procedure("temp", handler.clone()).await;

    let temp = Call::new("temp").to(net.id(B));
    let result = net.peer(A).call_procedure(temp.clone()).await.unwrap();
    assert_eq!(result, Some(json!("here")));

    assert!(net.peer(B).remove_procedure("temp", &handler).await);
    let result = net.peer(A).call_procedure(temp).await.unwrap();
    assert_eq!(result, Some(Value::Null));
    net.shutdown_all().await;
}
