//! Client for the remote inventory API.
//!
//! The server owns validation, stock decrement and id assignment; this module
//! only moves requests and canonical representations back and forth.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;

use stocktrack_core::{EntityId, Product, ProductCreate, ProductUpdate, Sale, SaleCreate, Stats};

#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),
    #[error("request timed out")]
    Timeout,
    #[error("API error ({0}): {1}")]
    Api(u16, String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("placeholder id {0} cannot be sent to the server")]
    Placeholder(EntityId),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Api(404, _))
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RemoteError::Timeout
        } else if err.is_decode() {
            RemoteError::Parse(err.to_string())
        } else {
            RemoteError::Network(err.to_string())
        }
    }
}

/// The server's resource API for products, sales and stats.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// Cheap reachability check.
    async fn health(&self) -> Result<(), RemoteError>;

    async fn list_products(&self) -> Result<Vec<Product>, RemoteError>;
    async fn get_product(&self, id: u64) -> Result<Product, RemoteError>;
    async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, RemoteError>;
    async fn create_product(&self, data: &ProductCreate) -> Result<Product, RemoteError>;
    async fn update_product(&self, id: u64, data: &ProductUpdate) -> Result<Product, RemoteError>;
    async fn delete_product(&self, id: u64) -> Result<(), RemoteError>;

    async fn list_sales(&self) -> Result<Vec<Sale>, RemoteError>;
    async fn get_sale(&self, id: u64) -> Result<Sale, RemoteError>;
    async fn sales_by_product(&self, product_id: u64) -> Result<Vec<Sale>, RemoteError>;
    async fn create_sale(&self, data: &SaleCreate) -> Result<Sale, RemoteError>;

    async fn stats(&self) -> Result<Stats, RemoteError>;
}

/// HTTP implementation of [`RemoteApi`] over `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpRemote {
    /// Every request is bounded by `timeout`.
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let base_url = Url::parse(api_url)
            .map_err(|e| RemoteError::Network(format!("invalid API url '{api_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RemoteError::Network(format!(
                "API url '{api_url}' cannot be used as a base"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Build `{base}/{segments...}`; collection routes keep the server's
    /// trailing slash.
    fn endpoint(&self, segments: &[&str], trailing_slash: bool) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
            if trailing_slash {
                path.push("");
            }
        }
        url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, RemoteError> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RemoteError::Api(status.as_u16(), body))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RemoteError> {
        let resp = self.send(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn health(&self) -> Result<(), RemoteError> {
        let url = self.endpoint(&[], true);
        self.send(self.client.get(url)).await.map(|_| ())
    }

    async fn list_products(&self) -> Result<Vec<Product>, RemoteError> {
        let url = self.endpoint(&["productos"], true);
        self.send_json(self.client.get(url)).await
    }

    async fn get_product(&self, id: u64) -> Result<Product, RemoteError> {
        let url = self.endpoint(&["productos", &id.to_string()], false);
        self.send_json(self.client.get(url)).await
    }

    async fn products_by_category(&self, category: &str) -> Result<Vec<Product>, RemoteError> {
        let url = self.endpoint(&["productos", "categoria", category], false);
        self.send_json(self.client.get(url)).await
    }

    async fn create_product(&self, data: &ProductCreate) -> Result<Product, RemoteError> {
        let url = self.endpoint(&["productos"], true);
        self.send_json(self.client.post(url).json(data)).await
    }

    async fn update_product(&self, id: u64, data: &ProductUpdate) -> Result<Product, RemoteError> {
        let url = self.endpoint(&["productos", &id.to_string()], false);
        self.send_json(self.client.put(url).json(data)).await
    }

    async fn delete_product(&self, id: u64) -> Result<(), RemoteError> {
        let url = self.endpoint(&["productos", &id.to_string()], false);
        self.send(self.client.delete(url)).await.map(|_| ())
    }

    async fn list_sales(&self) -> Result<Vec<Sale>, RemoteError> {
        let url = self.endpoint(&["ventas"], true);
        self.send_json(self.client.get(url)).await
    }

    async fn get_sale(&self, id: u64) -> Result<Sale, RemoteError> {
        let url = self.endpoint(&["ventas", &id.to_string()], false);
        self.send_json(self.client.get(url)).await
    }

    async fn sales_by_product(&self, product_id: u64) -> Result<Vec<Sale>, RemoteError> {
        let url = self.endpoint(&["ventas", "producto", &product_id.to_string()], false);
        self.send_json(self.client.get(url)).await
    }

    async fn create_sale(&self, data: &SaleCreate) -> Result<Sale, RemoteError> {
        if data.product_id.is_local() {
            return Err(RemoteError::Placeholder(data.product_id));
        }
        let url = self.endpoint(&["ventas"], true);
        self.send_json(self.client.post(url).json(data)).await
    }

    async fn stats(&self) -> Result<Stats, RemoteError> {
        let url = self.endpoint(&["stats"], true);
        self.send_json(self.client.get(url)).await
    }
}

/// Whether a failed delete means "already gone" rather than "not delivered".
pub(crate) fn delete_already_applied(err: &RemoteError) -> bool {
    err.is_not_found()
}

/// Whether the server refused the request for good.
///
/// 4xx answers other than auth, request timeout and rate limiting will not
/// change on retry.
pub fn is_permanent_rejection(err: &RemoteError) -> bool {
    match err {
        RemoteError::Api(code, _) => match StatusCode::from_u16(*code) {
            Ok(
                StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS,
            ) => false,
            Ok(status) => status.is_client_error(),
            Err(_) => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(base: &str) -> HttpRemote {
        HttpRemote::new(base, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn collection_routes_keep_trailing_slash() {
        let r = remote("http://localhost:8001");
        assert_eq!(
            r.endpoint(&["productos"], true).as_str(),
            "http://localhost:8001/productos/"
        );
        assert_eq!(r.endpoint(&[], true).as_str(), "http://localhost:8001/");
    }

    #[test]
    fn item_routes_and_base_paths() {
        let r = remote("http://localhost:8001/api/");
        assert_eq!(
            r.endpoint(&["productos", "12"], false).as_str(),
            "http://localhost:8001/api/productos/12"
        );
    }

    #[test]
    fn category_is_percent_encoded() {
        let r = remote("http://localhost:8001");
        assert_eq!(
            r.endpoint(&["productos", "categoria", "hand tools/misc"], false).as_str(),
            "http://localhost:8001/productos/categoria/hand%20tools%2Fmisc"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpRemote::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
        assert!(HttpRemote::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn classifies_errors() {
        assert!(RemoteError::Api(404, String::new()).is_not_found());
        assert!(is_permanent_rejection(&RemoteError::Api(400, "Stock insuficiente".into())));
        assert!(is_permanent_rejection(&RemoteError::Api(404, String::new())));
        assert!(!is_permanent_rejection(&RemoteError::Api(401, String::new())));
        assert!(!is_permanent_rejection(&RemoteError::Api(429, String::new())));
        assert!(!is_permanent_rejection(&RemoteError::Api(503, String::new())));
        assert!(!is_permanent_rejection(&RemoteError::Timeout));
    }
}
