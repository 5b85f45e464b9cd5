// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end calls over a loopback QUIC link.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dspace_protocol::{
    CallTimeout, Dispatcher, NoArgs, RequestContext, RpcClient, RpcServer, StorError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Serialize, Deserialize)]
struct DiskOffline {
    name: String,
    node_id: i64,
}

async fn start(dispatcher: Dispatcher) -> (Arc<RpcServer>, Arc<RpcClient>) {
    let server = Arc::new(RpcServer::self_signed("127.0.0.1:0".parse().unwrap()).unwrap());
    let addr = server.local_addr().unwrap();
    let dispatcher = Arc::new(dispatcher);
    let serving = server.clone();
    tokio::spawn(async move { serving.serve(dispatcher).await });
    let client = Arc::new(RpcClient::peer(addr).unwrap());
    (server, client)
}

#[tokio::test]
async fn test_call_returns_result() {
    let mut d = Dispatcher::new();
    d.register("disk_offline", |ctx: RequestContext, req: DiskOffline| async move {
        Ok::<_, StorError>(format!("{}:{}:{}", ctx.cluster_id, req.node_id, req.name))
    });
    let (server, client) = start(d).await;

    let ctx = RequestContext::admin("c1");
    let out: String = client
        .call(
            &ctx,
            "disk_offline",
            &DiskOffline {
                name: "sdb".into(),
                node_id: 4,
            },
            CallTimeout::Default,
        )
        .await
        .unwrap();
    assert_eq!(out, "c1:4:sdb");
    server.close();
}

#[tokio::test]
async fn test_typed_error_is_reconstructed() {
    let mut d = Dispatcher::new();
    d.register("pool_delete", |_ctx: RequestContext, _: NoArgs| async move {
        Err::<(), _>(StorError::PoolHasDependants {
            pool: "p1".into(),
            dependants: "zone default".into(),
        })
    });
    let (server, client) = start(d).await;

    let err = client
        .call::<_, ()>(
            &RequestContext::admin("c1"),
            "pool_delete",
            &json!({}),
            CallTimeout::Default,
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StorError::PoolHasDependants {
            pool: "p1".into(),
            dependants: "zone default".into()
        }
    );
    server.close();
}

#[tokio::test]
async fn test_missing_method() {
    let (server, client) = start(Dispatcher::new()).await;
    let err = client
        .call::<_, serde_json::Value>(
            &RequestContext::admin("c1"),
            "ceph_osd_install",
            &json!({}),
            CallTimeout::Default,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::NoSuchMethod { .. }));
    server.close();
}

#[tokio::test]
async fn test_call_timeout() {
    let mut d = Dispatcher::new();
    d.register("slow", |_ctx: RequestContext, _: NoArgs| async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok::<_, StorError>(true)
    });
    let (server, client) = start(d).await;
    let err = client
        .call::<_, bool>(
            &RequestContext::admin("c1"),
            "slow",
            &json!({}),
            CallTimeout::After(Duration::from_millis(200)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::CommandTimeout { .. }));
    server.close();
}

#[tokio::test]
async fn test_spawn_call_and_cast() {
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let mut d = Dispatcher::new();
    d.register("send_message", move |_ctx: RequestContext, _: NoArgs| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, StorError>(())
        }
    });
    let (server, client) = start(d).await;
    let ctx = RequestContext::admin("c1");

    let handle = client.spawn_call(&ctx, "send_message", &json!({}), CallTimeout::Default);
    handle.await.unwrap().unwrap();

    client.cast(&ctx, "send_message", &json!({}));
    for _ in 0..50 {
        if hits.load(Ordering::SeqCst) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    server.close();
}
