#![cfg(not(target_arch = "wasm32"))]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use sso_relay_rs::connector::{Connector, ConnectorError, InMemoryWebViewSurface, RequestFilter};
use sso_relay_rs::handler::{InMemoryTabHost, SsoHandler, TrustedCallers};
use sso_relay_rs::messaging::{HandlerMessage, InMemoryChannel, MessageReceiver, Responder};
use sso_relay_rs::util::Subscription;

const DEMO_ORIGIN: &str = "isolated-app://demo";
const HANDLER_TARGET: &str = "handler-ext";

fn sso_filter() -> RequestFilter {
    RequestFilter::parse(["https://sso.example.com/*"]).unwrap()
}

fn connector_for(
    channel: &InMemoryChannel,
    surface: &InMemoryWebViewSurface,
) -> (Connector, Arc<Mutex<Vec<ConnectorError>>>) {
    let errors: Arc<Mutex<Vec<ConnectorError>>> = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&errors);
    let connector = Connector::builder()
        .target(HANDLER_TARGET)
        .surface(Arc::new(surface.clone()))
        .messenger(Arc::new(channel.endpoint(DEMO_ORIGIN)))
        .filter(sso_filter())
        .on_error(move |err| captured.lock().unwrap().push(err.clone()))
        .build()
        .unwrap();
    (connector, errors)
}

/// A receiver that answers every ping with pong, like a healthy handler.
fn attach_pong_responder(channel: &InMemoryChannel) -> Subscription {
    channel.receiver(HANDLER_TARGET).on_request(Arc::new(
        |_caller, payload, responder: Responder| {
            if payload == json!({"type": "ping"}) {
                responder.send(HandlerMessage::Pong);
            }
        },
    ))
}

async fn wait_for(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn handshake_timeout_leaves_no_listener_attached() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();

    // A handler that holds the request open forever.
    let parked: Arc<Mutex<Vec<Responder>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&parked);
    let _receiver = channel.receiver(HANDLER_TARGET).on_request(Arc::new(
        move |_caller, _payload, responder| {
            sink.lock().unwrap().push(responder);
        },
    ));

    let (connector, _errors) = connector_for(&channel, &surface);
    let err = connector
        .start_with_timeout(Duration::from_millis(50))
        .await
        .unwrap_err();

    match err {
        ConnectorError::Communication { message } => {
            assert!(message.contains("timed out"), "got: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!connector.is_started());
    assert_eq!(surface.listener_count(), 0);
    assert!(!surface.navigate("https://sso.example.com/login"));
}

#[tokio::test]
async fn handshake_fails_fast_without_a_receiver() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();
    let (connector, _errors) = connector_for(&channel, &surface);

    let err = connector.start().await.unwrap_err();
    assert!(matches!(err, ConnectorError::Communication { .. }));
    assert_eq!(surface.listener_count(), 0);
}

#[tokio::test]
async fn handshake_rejects_an_unexpected_reply() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();
    let _receiver = channel.receiver(HANDLER_TARGET).on_request(Arc::new(
        |_caller, _payload, responder: Responder| {
            responder.send_value(json!({"type": "reboot"}));
        },
    ));

    let (connector, _errors) = connector_for(&channel, &surface);
    let err = connector.start().await.unwrap_err();
    match err {
        ConnectorError::Communication { message } => {
            assert!(message.contains("unexpected response"), "got: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn starting_twice_is_a_configuration_error() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();
    let _pong = attach_pong_responder(&channel);

    let (connector, _errors) = connector_for(&channel, &surface);
    connector.start().await.unwrap();
    assert!(connector.is_started());

    let err = connector.start().await.unwrap_err();
    match err {
        ConnectorError::Configuration { message } => {
            assert!(message.contains("already started"), "got: {message}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // The original subscription is untouched.
    assert_eq!(surface.listener_count(), 1);
}

#[tokio::test]
async fn stop_detaches_interception_and_is_idempotent() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();
    let _pong = attach_pong_responder(&channel);

    let (connector, _errors) = connector_for(&channel, &surface);
    connector.start().await.unwrap();
    assert_eq!(surface.listener_count(), 1);

    connector.stop();
    assert!(!connector.is_started());
    assert_eq!(surface.listener_count(), 0);
    connector.stop();

    // With no listener, matched URLs load normally again.
    assert!(!surface.navigate("https://sso.example.com/login"));

    // And the connector can be started again after a stop.
    connector.start().await.unwrap();
    assert_eq!(surface.listener_count(), 1);
}

#[tokio::test]
async fn a_reply_from_before_a_restart_is_discarded() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();

    // A handler that answers pings but holds every sso request open, so the
    // test controls exactly when each reply lands.
    let parked: Arc<Mutex<Vec<Responder>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&parked);
    let _receiver = channel.receiver(HANDLER_TARGET).on_request(Arc::new(
        move |_caller, payload, responder: Responder| {
            if payload == json!({"type": "ping"}) {
                responder.send(HandlerMessage::Pong);
            } else if payload["type"] == "sso_request" {
                sink.lock().unwrap().push(responder);
            }
        },
    ));

    let successes: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let errors: Arc<Mutex<Vec<ConnectorError>>> = Arc::new(Mutex::new(Vec::new()));
    let success_sink = Arc::clone(&successes);
    let error_sink = Arc::clone(&errors);
    let connector = Connector::builder()
        .target(HANDLER_TARGET)
        .surface(Arc::new(surface.clone()))
        .messenger(Arc::new(channel.endpoint(DEMO_ORIGIN)))
        .filter(sso_filter())
        .on_success(move |url| success_sink.lock().unwrap().push(url.to_string()))
        .on_error(move |err| error_sink.lock().unwrap().push(err.clone()))
        .build()
        .unwrap();

    connector.start().await.unwrap();
    assert!(surface.navigate("https://sso.example.com/login"));
    wait_for("the request to reach the handler", || {
        parked.lock().unwrap().len() == 1
    })
    .await;

    connector.stop();
    connector.start().await.unwrap();

    // The first session's reply arrives only now; the restarted connector
    // must not apply it.
    let stale = parked.lock().unwrap()[0].clone();
    assert!(stale.send(HandlerMessage::Success {
        redirect_url: "https://client.example/cb?code=stale".into(),
    }));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(successes.lock().unwrap().is_empty());
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(surface.navigation_target(), None);

    // The new session delegates and completes normally.
    assert!(surface.navigate("https://sso.example.com/login"));
    wait_for("the second request", || parked.lock().unwrap().len() == 2).await;
    let current = parked.lock().unwrap()[1].clone();
    assert!(current.send(HandlerMessage::Success {
        redirect_url: "https://client.example/cb?code=fresh".into(),
    }));
    wait_for("the fresh redirect", || !successes.lock().unwrap().is_empty()).await;
    assert_eq!(
        successes.lock().unwrap().as_slice(),
        &["https://client.example/cb?code=fresh".to_string()]
    );
    assert_eq!(
        surface.navigation_target().as_deref(),
        Some("https://client.example/cb?code=fresh")
    );
}

#[tokio::test]
async fn stop_abandons_the_open_flow_and_discards_the_late_reply() {
    let channel = InMemoryChannel::new();
    let surface = InMemoryWebViewSurface::new();
    let host = InMemoryTabHost::new();
    host.add_window();

    let handler = SsoHandler::builder(Arc::new(host.clone()))
        .trusted_callers(TrustedCallers::new().trust(DEMO_ORIGIN))
        .build();
    let _attached = handler.attach(&channel.receiver(HANDLER_TARGET));

    let (connector, errors) = connector_for(&channel, &surface);
    connector.start().await.unwrap();

    assert!(surface.navigate(
        "https://sso.example.com/login?redirect_uri=https%3A%2F%2Fclient.example%2Fcb"
    ));
    wait_for("tab to open", || host.open_tab_count() == 1).await;

    connector.stop();
    wait_for("handler to abandon the flow", || {
        handler.active_flow_count() == 0
    })
    .await;
    wait_for("tab to close", || host.open_tab_count() == 0).await;

    // The pending request died with the flow; since the connector is
    // stopped, no error callback fires for it.
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(errors.lock().unwrap().is_empty());
}
