use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use hyperpage::client::transport::duplex;
use hyperpage::client::{
    Client, ClientError, ClientService, ConnectionStrategy, Endpoint, PendingRequest,
    ResponseBody,
};
use tower::ServiceExt;

mod common;
use common::{response, target, BoxError, TestServer};

fn echo_server(incoming: duplex::DuplexIncoming) -> TestServer {
    TestServer::serve(incoming, |req| async move {
        let agent = req
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_owned();
        response(200, format!("{} {}", target(&req), agent))
    })
}

fn endpoint(strategy: ConnectionStrategy) -> Endpoint {
    Endpoint::builder("http://test.local/api/")
        .strategy(strategy)
        .user_agent("hyperpage-tests")
        .build()
        .unwrap()
}

#[tokio::test]
async fn every_strategy_round_trips() -> Result<(), BoxError> {
    common::init_tracing();

    for strategy in [
        ConnectionStrategy::OneShot,
        ConnectionStrategy::Persistent,
        ConnectionStrategy::pipelined(),
    ] {
        let (transport, incoming) = duplex::pair(1024);
        let _server = echo_server(incoming);
        let client = Client::new(transport);

        let connection = client.open(endpoint(strategy));
        let response = connection
            .send(PendingRequest::get("hello").query("name", "world"))
            .await?;

        assert_eq!(response.status(), StatusCode::OK, "{strategy:?}");
        assert_eq!(
            response.text(),
            Some("/api/hello?name=world hyperpage-tests"),
            "{strategy:?}"
        );

        client.shutdown_and_wait().await;
    }

    Ok(())
}

#[tokio::test]
async fn callback_runs_exactly_once() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let _server = echo_server(incoming);
    let client = Client::new(transport);
    let connection = client.open(endpoint(ConnectionStrategy::Persistent));

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    for path in ["one", "two", "three"] {
        let calls = calls.clone();
        let tx = tx.clone();
        connection.request(PendingRequest::get(path), move |outcome| {
            calls.fetch_add(1, Ordering::SeqCst);
            let _ = tx.send(outcome);
        });
    }
    drop(tx);

    let mut bodies = Vec::new();
    while let Some(outcome) = rx.recv().await {
        bodies.push(outcome?.text().unwrap_or_default().to_owned());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        bodies,
        [
            "/api/one hyperpage-tests",
            "/api/two hyperpage-tests",
            "/api/three hyperpage-tests"
        ]
    );

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn persistent_reuses_one_socket() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let server = echo_server(incoming);
    let client = Client::new(transport);

    let connection = client.open(endpoint(ConnectionStrategy::Persistent));
    for _ in 0..3 {
        connection.send(PendingRequest::get("ping")).await?;
    }
    assert_eq!(server.connections(), 1);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn one_shot_opens_a_socket_per_request() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let server = echo_server(incoming);
    let client = Client::new(transport);

    let connection = client.open(endpoint(ConnectionStrategy::OneShot));
    for _ in 0..3 {
        connection.send(PendingRequest::get("ping")).await?;
    }
    assert_eq!(server.connections(), 3);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn persistent_reconnects_after_peer_closes() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let server = TestServer::serve(incoming, |_req| async move {
        let mut response = response(200, "bye");
        response.headers_mut().insert(
            http::header::CONNECTION,
            http::HeaderValue::from_static("close"),
        );
        response
    });
    let client = Client::new(transport);

    let connection = client.open(endpoint(ConnectionStrategy::Persistent));
    for _ in 0..2 {
        let response = connection.send(PendingRequest::get("x")).await?;
        assert_eq!(response.text(), Some("bye"));
    }
    assert_eq!(server.connections(), 2);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn binary_and_text_bodies() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let _server = TestServer::serve(incoming, |_req| async move {
        response(200, Bytes::from_static(b"\xff\xfe raw"))
    });
    let client = Client::new(transport);
    let connection = client.open(endpoint(ConnectionStrategy::Persistent));

    let response = connection.send(PendingRequest::get("blob").binary()).await?;
    assert_eq!(
        response.body(),
        &ResponseBody::Binary(Bytes::from_static(b"\xff\xfe raw"))
    );

    let outcome = connection.send(PendingRequest::get("blob").text()).await;
    assert!(matches!(outcome, Err(ClientError::Decode(_))));

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn error_statuses_are_responses() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let _server = TestServer::serve(incoming, |_req| async move { response(404, "missing") });
    let client = Client::new(transport);
    let connection = client.open(endpoint(ConnectionStrategy::OneShot));

    let response = connection.send(PendingRequest::get("nope")).await?;
    assert_eq!(response.code(), 404);
    assert_eq!(response.text(), Some("missing"));

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn connect_failure_is_reported_through_the_callback() {
    let (transport, incoming) = duplex::pair(1024);
    drop(incoming);
    let client = Client::new(transport);

    for strategy in [
        ConnectionStrategy::OneShot,
        ConnectionStrategy::Persistent,
        ConnectionStrategy::pipelined(),
    ] {
        let connection = client.open(endpoint(strategy));
        let (tx, rx) = tokio::sync::oneshot::channel();
        connection.request(PendingRequest::get("x"), move |outcome| {
            let _ = tx.send(outcome);
        });

        let outcome = rx.await.unwrap();
        assert!(
            matches!(outcome, Err(ClientError::Transport(_))),
            "{strategy:?}: {outcome:?}"
        );
    }

    client.shutdown_and_wait().await;
}

#[tokio::test]
async fn shutdown_fails_in_flight_requests_and_joins() -> Result<(), BoxError> {
    common::init_tracing();
    let (transport, incoming) = duplex::pair(1024);
    let (seen_tx, mut seen) = tokio::sync::mpsc::unbounded_channel();
    let _server = TestServer::serve(incoming, move |_req| {
        let seen_tx = seen_tx.clone();
        async move {
            let _ = seen_tx.send(());
            std::future::pending::<()>().await;
            response(200, "never")
        }
    });
    let client = Client::new(transport);

    let mut pending = Vec::new();
    for strategy in [
        ConnectionStrategy::OneShot,
        ConnectionStrategy::Persistent,
        ConnectionStrategy::pipelined(),
    ] {
        let connection = client.open(endpoint(strategy));
        pending.push(tokio::spawn(async move {
            connection.send(PendingRequest::get("slow")).await
        }));
    }

    for _ in 0..3 {
        seen.recv().await.ok_or("server stopped")?;
    }

    tokio::time::timeout(Duration::from_secs(5), client.shutdown_and_wait()).await?;
    for task in pending {
        assert_eq!(
            task.await?,
            Err(ClientError::Transport("client shut down".into()))
        );
    }

    Ok(())
}

#[tokio::test]
async fn dropped_caller_does_not_stall_the_connection() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let _server = echo_server(incoming);
    let client = Client::new(transport);
    let connection = client.open(endpoint(ConnectionStrategy::Persistent));

    let abandoned = tokio::spawn({
        let connection = connection.clone();
        async move { connection.send(PendingRequest::get("abandoned")).await }
    });
    abandoned.abort();
    let _ = abandoned.await;

    let response = connection.send(PendingRequest::get("after")).await?;
    assert_eq!(response.text(), Some("/api/after hyperpage-tests"));

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn tower_service_issues_requests() -> Result<(), BoxError> {
    let (transport, incoming) = duplex::pair(1024);
    let _server = echo_server(incoming);
    let client = Client::new(transport);

    let service = ClientService::new(client.open(endpoint(ConnectionStrategy::Persistent)));
    let response = service.oneshot(PendingRequest::get("svc")).await?;
    assert_eq!(response.text(), Some("/api/svc hyperpage-tests"));

    client.shutdown_and_wait().await;
    Ok(())
}
