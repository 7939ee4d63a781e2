//! Integration tests for session bootstrap, presence and the API listener.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tao_core::config::Config;
use tao_core::session::SessionMetadata;
use tao_core::tree::{MemoryTree, TreePath};
use tao_core::{ChannelKind, Error, Identity, Session, SessionState};

use common::{assign_routes, metadata_path, settle, start_peer, RecordingClient};

#[tokio::test]
async fn test_start_announces_presence_once() {
    let tree = MemoryTree::new();
    let peer = start_peer(&tree, "synth");
    let meta = metadata_path("synth");

    assert_eq!(tree.writes_to(meta.child("isTurnedOn")), vec![json!(true)]);
    assert_eq!(tree.value_at(meta.child("name")), json!("synth"));
    assert_eq!(peer.session.metadata_path(), &meta);
}

#[tokio::test]
async fn test_invalid_identity_writes_nothing() {
    let tree = MemoryTree::new();
    let client = RecordingClient::new("client");

    for identity in [
        Identity::new("abc", common::TEST_URL, common::device_id("synth")),
        Identity::new("synth", "tao.io", common::device_id("synth")),
        Identity::new("synth", common::TEST_URL, "short"),
    ] {
        let result = Session::start(identity, client.clone(), Arc::new(tree.connect()));
        assert!(matches!(result, Err(Error::InvalidIdentity { .. })));
    }

    settle().await;
    assert!(tree.writes().is_empty());
}

#[tokio::test]
async fn test_ready_resolves_routes() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");

    let routes = peer.session.ready().await.unwrap();

    assert_eq!(
        routes.root_for(ChannelKind::Input).unwrap().as_str(),
        "channels/rack-in"
    );
    assert_eq!(
        routes.root_for(ChannelKind::Output).unwrap().as_str(),
        "channels/rack-out"
    );
    assert!(peer.session.is_ready());
}

#[tokio::test]
async fn test_on_ready_runs_once_with_snapshot() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");

    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::new(Mutex::new(Value::Null));
    {
        let calls = Arc::clone(&calls);
        let seen = Arc::clone(&seen);
        peer.session.on_ready(move |snapshot| {
            calls.fetch_add(1, Ordering::SeqCst);
            *seen.lock().unwrap() = snapshot.clone();
        });
    }

    peer.session.ready().await.unwrap();
    settle().await;

    // Later metadata changes do not re-run the resolution.
    tree.set(metadata_path("synth").child("input"), json!("elsewhere"));
    settle().await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let snapshot = seen.lock().unwrap().clone();
    let record = SessionMetadata::from_snapshot(&snapshot);
    assert_eq!(record.name.as_deref(), Some("synth"));
    assert!(record.is_turned_on);
    assert_eq!(record.input.as_deref(), Some("rack-in"));

    let routes = peer.session.ready().await.unwrap();
    assert_eq!(routes.input, Some(TreePath::new("channels/rack-in")));
}

#[tokio::test]
async fn test_on_ready_after_ready_runs_immediately() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");
    peer.session.ready().await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    peer.session.on_ready(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_session_status_written_only_on_demand() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");
    peer.session.ready().await.unwrap();
    settle().await;

    let module_status = metadata_path("synth").child("moduleStatus/tao");
    assert_eq!(tree.value_at(module_status.clone()), Value::Null);

    peer.session.session_status().set("degraded");
    let record = tree.value_at(module_status);
    assert_eq!(record["status"], json!("degraded"));
    assert_eq!(record["statusDescription"], json!("Unknown status"));
}

#[tokio::test]
async fn test_metadata_read() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");

    let record = peer.session.metadata_record().await;
    assert_eq!(record.output.as_deref(), Some("rack-out"));

    let raw = peer.session.metadata().await;
    assert_eq!(raw["name"], json!("synth"));
}

#[tokio::test]
async fn test_presence_cleared_on_ungraceful_disconnect() {
    let tree = MemoryTree::new();
    let peer = start_peer(&tree, "synth");
    peer.session.ready().await.unwrap();

    peer.connection.drop_connection();

    let meta = metadata_path("synth");
    assert_eq!(tree.value_at(meta.child("isTurnedOn")), Value::Null);
    assert_eq!(tree.value_at(meta.child("name")), json!("synth"));
    assert!(!SessionMetadata::from_snapshot(&tree.value_at(meta)).is_turned_on);
}

#[tokio::test]
async fn test_api_calls_forwarded_and_recorded() {
    let tree = MemoryTree::new();
    let meta = metadata_path("synth");
    tree.set(meta.child("api"), json!("reset"));

    let peer = start_peer(&tree, "synth");
    settle().await;

    // The value present at subscription time counts as a call.
    assert_eq!(
        peer.client.calls(),
        vec![(meta.child("api"), json!("reset"))]
    );

    tree.set(meta.child("api"), json!("panic"));
    settle().await;
    tree.set(meta.child("api"), Value::Null);
    settle().await;

    let calls = peer.client.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].1, json!("panic"));

    let status = tree.value_at(meta.child("moduleStatus/client"));
    assert_eq!(status["status"], json!("panic"));
    assert_eq!(status["statusDescription"], json!("Unknown status"));
    assert_eq!(status["statusLog"].as_object().unwrap().len(), 2);
}

#[tokio::test]
async fn test_missing_route_rejects_channel() {
    let tree = MemoryTree::new();
    let peer = start_peer(&tree, "synth");

    let result = peer.session.output("note").await;
    assert!(matches!(result, Err(Error::RouteUnresolved("output"))));
}

#[tokio::test]
async fn test_close_before_ready() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");

    peer.session.close();

    assert!(matches!(peer.session.ready().await, Err(Error::SessionClosed)));
    assert_eq!(peer.session.state(), SessionState::Closed);
    assert!(matches!(
        peer.session.output("note").await,
        Err(Error::SessionClosed)
    ));
}

#[tokio::test]
async fn test_close_after_ready() {
    let tree = MemoryTree::new();
    assign_routes(&tree, "synth", "rack-in", "rack-out");
    let peer = start_peer(&tree, "synth");
    peer.session.ready().await.unwrap();
    let note = peer.session.output("note").await.unwrap();

    peer.session.close();

    assert_eq!(peer.session.state(), SessionState::Closed);
    assert!(!peer.session.is_ready());
    assert!(matches!(
        peer.session.input("keys").await,
        Err(Error::SessionClosed)
    ));

    // Channels opened before the close keep working.
    note.enable();
    note.set_data(60);
    assert_eq!(tree.value_at("channels/rack-out/midi/note/data"), json!(60));
}

#[tokio::test]
async fn test_close_stops_api_listener() {
    let tree = MemoryTree::new();
    let peer = start_peer(&tree, "synth");
    settle().await;

    peer.session.close();
    settle().await;

    tree.set(metadata_path("synth").child("api"), json!("reset"));
    settle().await;

    assert!(peer.client.calls().is_empty());
}

#[tokio::test]
async fn test_session_from_config() {
    let tree = MemoryTree::new();
    let mut config = Config::default();
    config.identity.name = Some("synth".into());
    config.identity.url = Some(common::TEST_URL.into());
    config.identity.id = Some(common::device_id("synth"));
    config.channels.default_data_format = "osc".into();
    assign_routes(&tree, "synth", "rack-in", "rack-out");

    let session = Session::from_config(
        config,
        RecordingClient::new("client"),
        Arc::new(tree.connect()),
    )
    .unwrap();

    let channel = session.output("fader").await.unwrap();
    assert_eq!(channel.data_format(), "osc");
    assert_eq!(
        channel.data_path().as_str(),
        "channels/rack-out/osc/fader/data"
    );
}

#[tokio::test]
async fn test_session_from_incomplete_config() {
    let tree = MemoryTree::new();
    let result = Session::from_config(
        Config::default(),
        RecordingClient::new("client"),
        Arc::new(tree.connect()),
    );

    assert!(matches!(result, Err(Error::ConfigError(_))));
    assert!(tree.writes().is_empty());
}
