//! Table of vendor endpoints.
//!
//! The service's private API has moved between hosts and response shapes
//! several times, so every URL and payload layout lives here instead of at the
//! call sites. The table can be overridden from `config.json`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "https://home.nest.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSchema {
    /// The body is the payload itself.
    #[default]
    Bare,
    /// The payload sits under `items`, next to a numeric `status`.
    Envelope,
}

/// Decoded response body, normalized to the envelope layout.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de> + Default"))]
pub struct Envelope<T> {
    #[serde(default)]
    pub status: i64,
    #[serde(default)]
    pub status_description: Option<String>,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub items: T,
}

impl ResponseSchema {
    pub fn decode<T: DeserializeOwned + Default>(self, body: &str) -> serde_json::Result<Envelope<T>> {
        match self {
            ResponseSchema::Bare => Ok(Envelope {
                status: 0,
                status_description: None,
                status_detail: None,
                items: serde_json::from_str(body)?,
            }),
            ResponseSchema::Envelope => serde_json::from_str(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(default)]
    pub schema: ResponseSchema,
}

impl Endpoint {
    fn bare(url: String) -> Self {
        Self {
            url,
            schema: ResponseSchema::Bare,
        }
    }

    /// URL with `{id}` replaced.
    pub fn url_for(&self, id: impl std::fmt::Display) -> String {
        self.url.replace("{id}", &id.to_string())
    }

    /// Path component of the URL, used to match path-scoped cookies.
    pub fn path(&self) -> Option<String> {
        reqwest::Url::parse(&self.url)
            .ok()
            .map(|url| url.path().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Origin sent with every request.
    pub host: String,
    /// Login (POST) and primary-token probe (GET).
    pub session: Endpoint,
    pub verify_pin: Endpoint,
    /// Secondary-cookie exchange (POST) and probe (GET).
    pub site_login: Endpoint,
    pub list_clips: Endpoint,
    pub create_clip: Endpoint,
    pub delete_clip: Endpoint,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::for_host(DEFAULT_HOST)
    }
}

impl Endpoints {
    pub fn for_host(host: &str) -> Self {
        let host = host.trim_end_matches('/');
        Self {
            host: host.to_string(),
            session: Endpoint::bare(format!("{host}/session")),
            verify_pin: Endpoint::bare(format!("{host}/api/0.1/2fa/verify_pin")),
            site_login: Endpoint::bare(format!("{host}/dropcam/api/login")),
            list_clips: Endpoint::bare(format!("{host}/dropcam/api/visible_clips")),
            create_clip: Endpoint::bare(format!("{host}/dropcam/api/clips/request")),
            delete_clip: Endpoint::bare(format!("{host}/dropcam/api/clips/{{id}}")),
        }
    }

    pub fn referer(&self) -> String {
        format!("{}/", self.host)
    }
}
