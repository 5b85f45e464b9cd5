// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later

mod common;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use common::*;
use dspace_agent::handlers::logs::MAX_PULL;
use dspace_protocol::StorError;
use dspace_protocol::api::LogChunk;
use serde_json::json;

fn decode(chunk: &LogChunk) -> Vec<u8> {
    STANDARD.decode(&chunk.data).unwrap()
}

#[tokio::test]
async fn test_chunked_read_walks_the_file() {
    let h = Harness::new(vec![]).await;
    let body: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
    h.log_file("ceph/ceph-osd.3.log", &body);

    let size: u64 = h
        .call("log_file_size", json!({"path": "ceph/ceph-osd.3.log"}))
        .await
        .unwrap();
    assert_eq!(size, 1000);

    let mut offset = 0;
    let mut read = Vec::new();
    loop {
        let chunk: LogChunk = h
            .call_positional(
                "read_log_file_content",
                vec![json!("ceph/ceph-osd.3.log"), json!(offset), json!(300)],
            )
            .await
            .unwrap();
        assert_eq!(chunk.offset, offset);
        read.extend(decode(&chunk));
        offset += chunk.length;
        if chunk.eof {
            break;
        }
    }
    assert_eq!(read, body);
}

#[tokio::test]
async fn test_read_past_end_is_empty_eof() {
    let h = Harness::new(vec![]).await;
    h.log_file("messages", b"hello");
    let chunk: LogChunk = h
        .call("read_log_file_content", json!({"path": "messages", "offset": 50}))
        .await
        .unwrap();
    assert_eq!((chunk.offset, chunk.length, chunk.eof), (5, 0, true));
    assert!(decode(&chunk).is_empty());
}

#[tokio::test]
async fn test_pull_returns_whole_file() {
    let h = Harness::new(vec![]).await;
    let path = h.log_file("dspace/agent.log", b"line one\nline two\n");
    let chunk: LogChunk = h
        .call("pull_logfile", json!({"path": path.to_str().unwrap()}))
        .await
        .unwrap();
    assert!(chunk.eof);
    assert_eq!(decode(&chunk), b"line one\nline two\n");
}

#[tokio::test]
async fn test_pull_refuses_oversized_file_by_its_length() {
    let h = Harness::new(vec![]).await;
    let path = h.log_file("ceph/ceph.audit.log", b"");
    // sparse, so nothing is written to disk
    std::fs::OpenOptions::new()
        .write(true)
        .open(&path)
        .unwrap()
        .set_len(MAX_PULL + 1)
        .unwrap();

    let err = h
        .call::<LogChunk>("pull_logfile", json!({"path": "ceph/ceph.audit.log"}))
        .await
        .unwrap_err();
    assert!(matches!(err, StorError::InvalidInput { .. }), "{err:?}");

    let chunk: LogChunk = h
        .call_positional(
            "read_log_file_content",
            vec![json!("ceph/ceph.audit.log"), json!(MAX_PULL), json!(100)],
        )
        .await
        .unwrap();
    assert_eq!((chunk.length, chunk.eof), (1, true));
}

#[tokio::test]
async fn test_paths_outside_the_log_root_are_refused() {
    let h = Harness::new(vec![]).await;
    std::fs::write(h.path("secret"), "x").unwrap();

    for path in ["../secret", "/etc/passwd"] {
        let err = h.call::<u64>("log_file_size", json!({"path": path})).await.unwrap_err();
        assert!(
            matches!(err, StorError::InvalidInput { .. } | StorError::LogFileNotFound { .. }),
            "{path}: {err:?}"
        );
    }
    assert!(matches!(
        h.call::<u64>("log_file_size", json!({"path": "missing.log"})).await,
        Err(StorError::LogFileNotFound { .. })
    ));
}
