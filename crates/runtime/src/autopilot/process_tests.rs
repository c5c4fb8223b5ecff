// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde_json::json;

use super::*;

#[tokio::test]
async fn frames_round_trip_through_a_cat_echo_process() {
    let mut proc = AutopilotProcess::spawn(&["cat".to_owned()]).expect("spawn cat");
    assert!(proc.pid().is_some());

    let sent = ParentMessage::Init { context: json!({"boardId": "sensors"}), board_context: json!({}) };
    proc.send(&sent).await.expect("send");

    // `cat` echoes our own frame back: the first byte we sent was the
    // length prefix for an `Init` message, which `ChildMessage` cannot
    // decode (it only understands child-originated variants), so assert on
    // the raw frame length instead of the parsed shape.
    let mut len_buf = [0u8; 4];
    use tokio::io::AsyncReadExt;
    proc.stdout.read_exact(&mut len_buf).await.expect("read length prefix");
    let len = u32::from_be_bytes(len_buf) as usize;
    assert!(len > 0);

    proc.terminate();
}

#[tokio::test]
async fn recv_returns_none_on_eof() {
    let mut proc = AutopilotProcess::spawn(&["true".to_owned()]).expect("spawn true");
    // `true` exits immediately and closes its stdout.
    let result = proc.recv().await.expect("recv does not error on eof");
    assert!(result.is_none());
}
