//! Lazily loaded entity images.
//!
//! An [`ImageBackedEntity`] pairs an application entity with the location of
//! its image, and fetches the image only when asked. Entities whose images
//! share a directory are best bound together with [`bind_entities`], which
//! infers that directory and serves every image over one connection.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use http::StatusCode;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::client::{
    Client, ClientError, Connection, ConnectionStrategy, Endpoint, PendingRequest,
};
use crate::image::{ContainerDecoder, DecodedImage, ImageDecoder};
use crate::prefix::infer_base;

/// An application value which may have an image.
pub trait Entity: Clone + Eq + Hash + Send + Sync + 'static {
    /// Where this entity's image lives: an absolute URL, or a path relative to
    /// a shared endpoint's base.
    fn image_url(&self) -> Option<&str>;
}

/// Progress of an entity's image fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FetchState {
    /// No fetch has been attempted.
    #[default]
    NotStarted,
    /// A fetch is in progress.
    InFlight,
    /// The last fetch produced an image.
    Ready,
    /// The last fetch failed.
    Failed,
}

#[derive(Debug, Clone)]
struct ImageSource {
    resource: String,
    connection: Connection,
}

/// An entity bound to a lazily fetched image.
///
/// Equality and hashing only consider the wrapped entity, never the fetch
/// state, so a list diff sees the same wrapper while its image is loading.
#[derive(Clone)]
pub struct ImageBackedEntity<E> {
    entity: E,
    source: Option<Result<ImageSource, ClientError>>,
    state: Arc<Mutex<FetchState>>,
    decoder: Arc<dyn ImageDecoder>,
}

impl<E: fmt::Debug> fmt::Debug for ImageBackedEntity<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageBackedEntity")
            .field("entity", &self.entity)
            .field("resource", &self.resource())
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl<E: PartialEq> PartialEq for ImageBackedEntity<E> {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
    }
}

impl<E: Eq> Eq for ImageBackedEntity<E> {}

impl<E: Hash> Hash for ImageBackedEntity<E> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state)
    }
}

impl<E: Entity> ImageBackedEntity<E> {
    /// Bind `entity` to its image.
    ///
    /// If the image URL lies under `shared`'s base URL, the image is fetched
    /// over `shared` using the remainder of the URL. A relative image URL is
    /// resolved against `shared`. Any other absolute URL gets a one-shot
    /// connection of its own, opened on `client`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(entity: E, client: &Client, shared: Option<&Connection>) -> Self {
        let source = entity
            .image_url()
            .and_then(|url| locate(url, client, shared));

        Self {
            entity,
            source,
            state: Arc::new(Mutex::new(FetchState::NotStarted)),
            decoder: Arc::new(ContainerDecoder),
        }
    }
}

impl<E> ImageBackedEntity<E> {
    /// Decode images with `decoder` instead of the [`ContainerDecoder`].
    pub fn with_decoder(mut self, decoder: Arc<dyn ImageDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// The wrapped entity.
    pub fn entity(&self) -> &E {
        &self.entity
    }

    /// Consume the wrapper, returning the entity.
    pub fn into_entity(self) -> E {
        self.entity
    }

    /// The image path, relative to [`connection`][Self::connection]'s base.
    pub fn resource(&self) -> Option<&str> {
        match &self.source {
            Some(Ok(source)) => Some(&source.resource),
            _ => None,
        }
    }

    /// The connection the image is fetched over.
    pub fn connection(&self) -> Option<&Connection> {
        match &self.source {
            Some(Ok(source)) => Some(&source.connection),
            _ => None,
        }
    }

    /// Progress of the most recent fetch.
    pub fn state(&self) -> FetchState {
        *self.state.lock()
    }

    /// Fetch and decode the image.
    ///
    /// Resolves to `None` when the entity has no image. Fails with
    /// [`ClientError::BadStatus`] unless the server answers `200 OK`, and with
    /// [`ClientError::Decode`] when the bytes are not an image. Nothing is
    /// cached; every call issues a new request.
    pub async fn fetch(&self) -> Result<Option<DecodedImage>, ClientError> {
        let source = match &self.source {
            None => return Ok(None),
            Some(Err(error)) => {
                *self.state.lock() = FetchState::Failed;
                return Err(error.clone());
            }
            Some(Ok(source)) => source,
        };

        let guard = InFlight::start(&self.state);
        let result = self.fetch_from(source).await;
        guard.finish(result.is_ok());
        result.map(Some)
    }

    async fn fetch_from(&self, source: &ImageSource) -> Result<DecodedImage, ClientError> {
        let response = source
            .connection
            .send(PendingRequest::get(source.resource.as_str()).binary())
            .await?;

        if response.status() != StatusCode::OK {
            debug!(status = %response.status(), resource = %source.resource, "image fetch failed");
            return Err(ClientError::BadStatus {
                status: response.code(),
            });
        }

        self.decoder.decode(response.bytes())
    }
}

/// Marks a fetch in flight; reverts to not started if the fetch is dropped.
struct InFlight<'a> {
    state: &'a Mutex<FetchState>,
    done: bool,
}

impl<'a> InFlight<'a> {
    fn start(state: &'a Mutex<FetchState>) -> Self {
        *state.lock() = FetchState::InFlight;
        Self { state, done: false }
    }

    fn finish(mut self, ok: bool) {
        *self.state.lock() = if ok {
            FetchState::Ready
        } else {
            FetchState::Failed
        };
        self.done = true;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.done {
            *self.state.lock() = FetchState::NotStarted;
        }
    }
}

fn locate(
    url: &str,
    client: &Client,
    shared: Option<&Connection>,
) -> Option<Result<ImageSource, ClientError>> {
    if let Some(connection) = shared {
        if let Some(resource) = connection.endpoint().relative_to_base(url) {
            return Some(Ok(ImageSource {
                resource,
                connection: connection.clone(),
            }));
        }
    }

    if !is_absolute(url) {
        let connection = shared?;
        return Some(Ok(ImageSource {
            resource: url.trim_start_matches('/').to_owned(),
            connection: connection.clone(),
        }));
    }

    trace!(%url, "opening a dedicated connection for image");
    Some(dedicated(url, client))
}

fn dedicated(url: &str, client: &Client) -> Result<ImageSource, ClientError> {
    let base = infer_base([url])?;
    let endpoint = Endpoint::builder(&base)
        .strategy(ConnectionStrategy::OneShot)
        .build()?;

    let resource = endpoint.relative_to_base(url).ok_or_else(|| {
        ClientError::InvalidArgument(format!("image url {url} is not under {endpoint}"))
    })?;

    Ok(ImageSource {
        resource,
        connection: client.open(endpoint),
    })
}

fn is_absolute(url: &str) -> bool {
    url::Url::parse(url).is_ok()
}

/// Bind every entity to its image, sharing one connection where possible.
///
/// The base directory common to all absolute image URLs is inferred with
/// [`infer_base`] and a single connection with `strategy` is opened for it.
/// Images outside that directory (and every image, when the URLs share no
/// usable base) fall back to one-shot connections of their own.
///
/// Must be called from within a tokio runtime.
pub fn bind_entities<E, I>(
    client: &Client,
    entities: I,
    strategy: ConnectionStrategy,
) -> Vec<ImageBackedEntity<E>>
where
    E: Entity,
    I: IntoIterator<Item = E>,
{
    let entities: Vec<E> = entities.into_iter().collect();
    let urls = entities
        .iter()
        .filter_map(|entity| entity.image_url())
        .filter(|url| is_absolute(url));

    let shared = match shared_endpoint(urls, strategy) {
        Ok(Some(endpoint)) => Some(client.open(endpoint)),
        Ok(None) => None,
        Err(error) => {
            debug!(%error, "entity images share no endpoint");
            None
        }
    };

    entities
        .into_iter()
        .map(|entity| ImageBackedEntity::new(entity, client, shared.as_ref()))
        .collect()
}

fn shared_endpoint<'u>(
    urls: impl Iterator<Item = &'u str>,
    strategy: ConnectionStrategy,
) -> Result<Option<Endpoint>, ClientError> {
    let mut urls = urls.peekable();
    if urls.peek().is_none() {
        return Ok(None);
    }

    let base = infer_base(urls)?;
    let endpoint = Endpoint::builder(&base).strategy(strategy).build()?;
    debug!(%endpoint, "shared image endpoint");
    Ok(Some(endpoint))
}
