use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue, InvalidHeaderValue};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::endpoints::{Endpoint, Endpoints, Envelope};
use crate::session::Session;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_3) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/79.0.3945.130 Safari/537.36";

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),
    #[error("invalid header value")]
    InvalidHeader(#[from] InvalidHeaderValue),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),
    #[error("failed to decode response: {source}")]
    Decode {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// Authenticated access to the service. Every request carries the
/// browser-like headers the web app sends plus the attached session cookies.
pub struct Api {
    client: Client,
    endpoints: Endpoints,
    cookie: Option<HeaderValue>,
}

impl Api {
    pub fn new(endpoints: Endpoints) -> Result<Self, RequestError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        headers.insert(header::ORIGIN, HeaderValue::from_str(&endpoints.host)?);
        headers.insert(header::REFERER, HeaderValue::from_str(&endpoints.referer())?);

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RequestError::Client)?;

        Ok(Self {
            client,
            endpoints,
            cookie: None,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Uses the session's current tokens for all further requests.
    pub fn attach(&mut self, session: &Session) {
        self.cookie = session
            .cookie_header()
            .and_then(|value| match HeaderValue::from_str(&value) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(error = %err, "session tokens are not valid header text; sending no cookies");
                    None
                }
            });
    }

    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.cookie {
            Some(cookie) => builder.header(header::COOKIE, cookie.clone()),
            None => builder,
        }
    }

    /// Request without session cookies, for the login handshake.
    pub fn bare_request(&self, method: Method, url: &str) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response, RequestError> {
        let request = builder.build()?;
        let method = request.method().clone();
        let url = request.url().to_string();
        debug!(%method, %url, "sending request");

        let response = self.client.execute(request).await?;
        debug!(%method, %url, status = %response.status(), "received response");
        Ok(response)
    }

    /// GET without status handling, for callers that inspect the status.
    pub async fn get(&self, url: &str) -> Result<Response, RequestError> {
        self.send(self.request(Method::GET, url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RequestError> {
        let response = self.get(url).await?;
        read_json(response, |body| serde_json::from_str(body)).await
    }

    pub async fn post_form_json<T, F>(&self, url: &str, form: &F) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        F: Serialize + ?Sized,
    {
        let response = self
            .send(self.request(Method::POST, url).form(form))
            .await?;
        read_json(response, |body| serde_json::from_str(body)).await
    }

    pub async fn post_json<T, B>(&self, url: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self
            .send(self.request(Method::POST, url).json(body))
            .await?;
        read_json(response, |body| serde_json::from_str(body)).await
    }

    /// GET decoded through the endpoint's response schema.
    pub async fn get_payload<T>(&self, endpoint: &Endpoint) -> Result<Envelope<T>, RequestError>
    where
        T: DeserializeOwned + Default,
    {
        let response = self.get(&endpoint.url).await?;
        read_json(response, |body| endpoint.schema.decode(body)).await
    }

    /// Form POST decoded through the endpoint's response schema.
    pub async fn post_form_payload<T, F>(
        &self,
        endpoint: &Endpoint,
        form: &F,
    ) -> Result<Envelope<T>, RequestError>
    where
        T: DeserializeOwned + Default,
        F: Serialize + ?Sized,
    {
        let response = self
            .send(self.request(Method::POST, &endpoint.url).form(form))
            .await?;
        read_json(response, |body| endpoint.schema.decode(body)).await
    }

    /// DELETE; the status is returned as-is for the caller to judge.
    pub async fn delete(&self, url: &str) -> Result<StatusCode, RequestError> {
        let response = self.send(self.request(Method::DELETE, url)).await?;
        Ok(response.status())
    }
}

async fn read_json<T>(
    response: Response,
    decode: impl FnOnce(&str) -> serde_json::Result<T>,
) -> Result<T, RequestError> {
    let status = response.status();
    if status != StatusCode::OK {
        return Err(RequestError::UnexpectedStatus(status));
    }

    let body = response.text().await?;
    trace!(%body, "response body");
    decode(&body).map_err(|source| RequestError::Decode { source, body })
}
