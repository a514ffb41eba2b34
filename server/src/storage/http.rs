//! Remote table reached over the server's HTTP surface.

use async_trait::async_trait;
use quarry_engine::{Entity, Error, QueryFilter, RecordKey, Result, Shape};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{entity_shape, Repository};
use crate::error::ErrorBody;

#[derive(Debug, Deserialize)]
struct Deleted {
    deleted: bool,
}

/// Repository that forwards every call to a remote `quarry-server`.
///
/// Network failures and unreadable responses become
/// [`Error::Transport`]; error bodies from the server are mapped back onto
/// the error they were rendered from.
#[derive(Debug, Clone)]
pub struct HttpTable<R: Entity> {
    client: Client,
    base: Url,
    shape: Shape<R>,
}

impl<R: Entity> HttpTable<R> {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| Error::Configuration(format!("invalid remote url '{base_url}': {e}")))?;
        if base.cannot_be_a_base() {
            return Err(Error::Configuration(format!(
                "remote url '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            client,
            base,
            shape: entity_shape::<R>()?,
        })
    }

    /// `<base>/api/<table>[/<segment>]`
    fn url(&self, segment: Option<&str>) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::Configuration(format!("remote url '{}' cannot carry a path", self.base))
            })?;
            segments.pop_if_empty().push("api").push(&self.shape.table);
            if let Some(segment) = segment {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn request(&self, method: Method, segment: Option<&str>) -> Result<RequestBuilder> {
        let url = self.url(segment)?;
        tracing::debug!(method = %method, url = %url, "Remote call");
        Ok(self.client.request(method, url))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            tracing::warn!(table = %self.shape.table, error = %e, "Remote call failed");
            Error::Transport(e.to_string())
        })
    }

    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let response = check(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("unreadable response: {e}")))
    }
}

/// Pass successful responses through; map error bodies back to errors.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    Err(match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.into_error(),
        Err(_) => Error::Transport(format!("remote returned {status}")),
    })
}

#[async_trait]
impl<R: Entity> Repository<R> for HttpTable<R> {
    fn shape(&self) -> &Shape<R> {
        &self.shape
    }

    async fn fetch_all(&self) -> Result<Vec<R>> {
        let response = self.send(self.request(Method::GET, None)?).await?;
        self.decode(response).await
    }

    async fn fetch_filtered(&self, filter: &QueryFilter) -> Result<Vec<R>> {
        let request = self
            .request(Method::POST, Some("query"))?
            .json(&filter.without_projection());
        let response = self.send(request).await?;
        self.decode(response).await
    }

    async fn fetch_projected(&self, filter: &QueryFilter) -> Result<Vec<Value>> {
        let request = self.request(Method::POST, Some("query"))?.json(filter);
        let response = self.send(request).await?;
        self.decode(response).await
    }

    async fn fetch_by_id(&self, id: &R::Key) -> Result<Option<R>> {
        let segment = id.to_string();
        let response = self.send(self.request(Method::GET, Some(&segment))?).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return match check(response).await {
                Err(Error::NotFound(_)) => Ok(None),
                Err(other) => Err(other),
                Ok(_) => Ok(None),
            };
        }
        self.decode(response).await.map(Some)
    }

    async fn insert(&self, record: R) -> Result<R> {
        let request = self.request(Method::POST, None)?.json(&record);
        let response = self.send(request).await?;
        self.decode(response).await
    }

    async fn update(&self, record: R) -> Result<R> {
        let request = self.request(Method::PUT, None)?.json(&record);
        let response = self.send(request).await?;
        self.decode(response).await
    }

    async fn delete_by_id(&self, id: &R::Key) -> Result<bool> {
        let segment = id.to_string();
        let response = self.send(self.request(Method::DELETE, Some(&segment))?).await?;
        let body: Deleted = self.decode(response).await?;
        Ok(body.deleted)
    }

    async fn delete_all(&self) -> Result<()> {
        let response = self.send(self.request(Method::DELETE, None)?).await?;
        check(response).await?;
        Ok(())
    }
}
