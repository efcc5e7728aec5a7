use log::debug;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, HeaderValue, LINK, USER_AGENT};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub const API_KEY_HEADER: &str = "X-Cisco-Meraki-API-Key";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid URL `{url}`: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("building HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{method} {url} failed: {source}")]
    Transport {
        method: Method,
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Http {
        method: Method,
        url: String,
        status: u16,
        body: String,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseData {
    pub url: Url,
    pub status: u16,
    pub body: String,
    pub json: Option<Value>,
    /// Raw `Link` header, if the server sent one.
    pub link: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: Client,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, ApiError> {
        // Url::join drops the last segment unless the base ends in a slash,
        // which would turn `/api/v1` + `organizations` into `/api/organizations`.
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let parsed = Url::parse(&normalized).map_err(|source| ApiError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let http = Client::builder()
            .user_agent(HeaderValue::from_static("merakictl/0.1"))
            .build()
            .map_err(ApiError::Client)?;

        Ok(Self {
            base_url: parsed,
            http,
            api_key: api_key.to_string(),
        })
    }

    pub fn url(&self, path: &str) -> Result<Url, ApiError> {
        let normalized = path.trim_start_matches('/');
        self.base_url
            .join(normalized)
            .map_err(|source| ApiError::InvalidUrl {
                url: path.to_string(),
                source,
            })
    }

    pub fn get(&self, path: &str, query: &[(&str, String)]) -> Result<ResponseData, ApiError> {
        let mut url = self.url(path)?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        self.get_url(url)
    }

    /// GET an absolute URL, as handed out by a `Link` header.
    pub fn get_url(&self, url: Url) -> Result<ResponseData, ApiError> {
        self.request(Method::GET, url, Option::<&Value>::None)
    }

    pub fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ResponseData, ApiError> {
        let url = self.url(path)?;
        self.request(Method::POST, url, Some(body))
    }

    fn request<T: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&T>,
    ) -> Result<ResponseData, ApiError> {
        let mut request = self
            .http
            .request(method.clone(), url.clone())
            .header(API_KEY_HEADER, &self.api_key)
            .header(ACCEPT, HeaderValue::from_static("application/json"))
            .header(USER_AGENT, HeaderValue::from_static("merakictl/0.1"));

        if let Some(body) = body {
            request = request.json(body);
        }

        let transport = |source| ApiError::Transport {
            method: method.clone(),
            url: url.to_string(),
            source,
        };

        let response = request.send().map_err(transport)?;
        let status = response.status();
        debug!("{} {} -> {}", method, url, status.as_u16());

        let link = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().map_err(transport)?;

        if !status.is_success() {
            return Err(ApiError::Http {
                method,
                url: url.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let json = serde_json::from_str(&text).ok();

        Ok(ResponseData {
            url,
            status: status.as_u16(),
            body: text,
            json,
            link,
        })
    }
}
