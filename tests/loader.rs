use std::collections::HashSet;

use hyper::body::Incoming;
use hyperpage::client::transport::duplex;
use hyperpage::client::{Client, ClientError, ConnectionStrategy};
use hyperpage::image::ImageFormat;
use hyperpage::loader::{bind_entities, Entity, FetchState};

mod common;
use common::{png, response, BoxError, TestResponse, TestServer};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Plant {
    name: &'static str,
    photo: Option<&'static str>,
}

impl Plant {
    fn new(name: &'static str, photo: Option<&'static str>) -> Self {
        Self { name, photo }
    }
}

impl Entity for Plant {
    fn image_url(&self) -> Option<&str> {
        self.photo
    }
}

async fn gallery(req: http::Request<Incoming>) -> TestResponse {
    let host = req
        .headers()
        .get(http::header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();

    match (host.as_str(), req.uri().path()) {
        ("cdn.test", "/plants/missing.png") => response(404, "not found"),
        ("cdn.test", "/plants/notes.txt") => response(200, "water weekly"),
        ("cdn.test", "/plants/cut.png") => {
            let full = png(32, 24);
            response(200, full.slice(..full.len() - 12))
        }
        ("cdn.test", _) => response(200, png(32, 24)),
        ("other.test", "/solo.png") => response(200, png(8, 8)),
        _ => response(404, "unknown"),
    }
}

fn setup() -> (Client, TestServer) {
    common::init_tracing();
    let (transport, incoming) = duplex::pair(64 * 1024);
    let server = TestServer::serve(incoming, gallery);
    (Client::new(transport), server)
}

#[tokio::test]
async fn shared_base_fetches_over_one_connection() -> Result<(), BoxError> {
    let (client, server) = setup();

    let entities = bind_entities(
        &client,
        [
            Plant::new("fern", Some("http://cdn.test/plants/fern.png")),
            Plant::new("ivy", Some("http://cdn.test/plants/climbing/ivy.png")),
            Plant::new("moss", None),
        ],
        ConnectionStrategy::Persistent,
    );

    assert_eq!(entities[0].resource(), Some("fern.png"));
    assert_eq!(entities[1].resource(), Some("climbing/ivy.png"));
    assert_eq!(entities[2].resource(), None);
    let base = entities[0].connection().map(|conn| conn.endpoint().base_url());
    assert_eq!(base.as_deref(), Some("http://cdn.test/plants/"));

    for entity in &entities[..2] {
        assert_eq!(entity.state(), FetchState::NotStarted);
        let image = entity.fetch().await?.ok_or("no image")?;
        assert_eq!(image.format(), ImageFormat::Png);
        assert_eq!((image.width(), image.height()), (32, 24));
        assert_eq!(entity.state(), FetchState::Ready);
    }

    assert_eq!(entities[2].fetch().await?, None);
    assert_eq!(entities[2].state(), FetchState::NotStarted);
    assert_eq!(server.connections(), 1);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn explicit_default_port_still_shares_one_connection() -> Result<(), BoxError> {
    let (client, server) = setup();

    let entities = bind_entities(
        &client,
        [
            Plant::new("fern", Some("http://CDN.test:80/plants/fern.png")),
            Plant::new("ivy", Some("http://CDN.test:80/plants/ivy.png")),
        ],
        ConnectionStrategy::Persistent,
    );

    for entity in &entities {
        let strategy = entity.connection().map(|conn| conn.endpoint().strategy());
        assert_eq!(strategy, Some(ConnectionStrategy::Persistent));
        entity.fetch().await?.ok_or("no image")?;
    }
    assert_eq!(entities[0].resource(), Some("fern.png"));
    assert_eq!(server.connections(), 1);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn failures_mark_the_entity_failed() -> Result<(), BoxError> {
    let (client, _server) = setup();

    let entities = bind_entities(
        &client,
        [
            Plant::new("missing", Some("http://cdn.test/plants/missing.png")),
            Plant::new("notes", Some("http://cdn.test/plants/notes.txt")),
        ],
        ConnectionStrategy::pipelined(),
    );

    let missing = entities[0].fetch().await;
    assert_eq!(missing, Err(ClientError::BadStatus { status: 404 }));
    assert_eq!(entities[0].state(), FetchState::Failed);

    let notes = entities[1].fetch().await;
    assert!(matches!(notes, Err(ClientError::Decode(_))), "{notes:?}");
    assert_eq!(entities[1].state(), FetchState::Failed);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn truncated_download_is_a_decode_failure() -> Result<(), BoxError> {
    let (client, _server) = setup();

    let entities = bind_entities(
        &client,
        [Plant::new("cut", Some("http://cdn.test/plants/cut.png"))],
        ConnectionStrategy::Persistent,
    );

    let outcome = entities[0].fetch().await;
    assert!(matches!(outcome, Err(ClientError::Decode(_))), "{outcome:?}");
    assert_eq!(entities[0].state(), FetchState::Failed);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn unrelated_hosts_get_dedicated_connections() -> Result<(), BoxError> {
    let (client, server) = setup();

    let entities = bind_entities(
        &client,
        [
            Plant::new("fern", Some("http://cdn.test/plants/fern.png")),
            Plant::new("solo", Some("http://other.test/solo.png")),
        ],
        ConnectionStrategy::Persistent,
    );

    assert_eq!(entities[0].resource(), Some("fern.png"));
    assert_eq!(entities[1].resource(), Some("solo.png"));

    let fern = entities[0].fetch().await?.ok_or("no image")?;
    let solo = entities[1].fetch().await?.ok_or("no image")?;
    assert_eq!(fern.width(), 32);
    assert_eq!(solo.width(), 8);
    assert_eq!(server.connections(), 2);

    client.shutdown_and_wait().await;
    Ok(())
}

#[tokio::test]
async fn identity_ignores_fetch_state() -> Result<(), BoxError> {
    let (client, _server) = setup();
    let plants = [
        Plant::new("fern", Some("http://cdn.test/plants/fern.png")),
        Plant::new("fern", Some("http://cdn.test/plants/fern.png")),
    ];

    let entities = bind_entities(&client, plants, ConnectionStrategy::OneShot);
    entities[0].fetch().await?;
    assert_ne!(entities[0].state(), entities[1].state());
    assert_eq!(entities[0], entities[1]);

    let unique: HashSet<_> = entities.iter().collect();
    assert_eq!(unique.len(), 1);

    let plant = entities[1].clone().into_entity();
    assert_eq!(plant.name, "fern");

    client.shutdown_and_wait().await;
    Ok(())
}
