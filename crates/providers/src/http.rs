//! Thin REST client shared by the hosted-provider adapters.
//!
//! Handles base-URL joining (with per-segment percent-encoding), the
//! provider's authentication scheme, and mapping of transport failures and
//! non-success statuses onto [`ProviderError`].

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use gitops::ProviderError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest error body echoed back inside [`ProviderError::Api`].
const MAX_ERROR_BODY: usize = 512;

/// How requests authenticate against a provider API.
#[derive(Clone)]
pub(crate) enum Auth {
    Anonymous,
    /// `Authorization: Bearer <token>` (GitHub, Bitbucket access tokens).
    Bearer(String),
    /// `Authorization: token <token>` (Gitea).
    Token(String),
    /// A provider-specific header carrying the token (GitLab `PRIVATE-TOKEN`).
    Header { name: &'static str, value: String },
    /// HTTP basic auth (Bitbucket username + app password).
    Basic { user: String, password: String },
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print credentials.
        let scheme = match self {
            Self::Anonymous => "anonymous",
            Self::Bearer(_) => "bearer",
            Self::Token(_) => "token",
            Self::Header { .. } => "header",
            Self::Basic { .. } => "basic",
        };
        f.write_str(scheme)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    http: reqwest::Client,
    base: Url,
    auth: Auth,
}

impl ApiClient {
    pub(crate) fn new(base_url: &str, auth: Auth) -> Result<Self, ProviderError> {
        let base = Url::parse(base_url).map_err(|e| ProviderError::Configuration {
            message: format!("invalid API base URL '{base_url}': {e}"),
        })?;
        if base.cannot_be_a_base() {
            return Err(ProviderError::Configuration {
                message: format!("API base URL '{base_url}' cannot carry a path"),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("trigra/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Configuration {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http, base, auth })
    }

    /// Appends `segments` to the base URL, percent-encoding each one
    /// (including any `/` inside a segment).
    pub(crate) fn url<I, S>(&self, segments: I) -> Url
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty();
            for segment in segments {
                path.push(segment.as_ref());
            }
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.auth {
            Auth::Anonymous => builder,
            Auth::Bearer(token) => builder.bearer_auth(token),
            Auth::Token(token) => builder.header("Authorization", format!("token {token}")),
            Auth::Header { name, value } => builder.header(*name, value),
            Auth::Basic { user, password } => builder.basic_auth(user, Some(password)),
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let mut message = response.text().await.unwrap_or_default();
        if message.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !message.is_char_boundary(cut) {
                cut -= 1;
            }
            message.truncate(cut);
        }
        Err(ProviderError::Api {
            status: status.as_u16(),
            message: message.trim().to_string(),
        })
    }

    /// GETs `url` and decodes the JSON body.
    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, ProviderError> {
        let (value, _) = self.get_json_with_headers(url).await?;
        Ok(value)
    }

    /// GETs `url`, decoding the JSON body and returning the response headers
    /// (for header-driven pagination).
    pub(crate) async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        url: Url,
    ) -> Result<(T, HeaderMap), ProviderError> {
        let response = self.send(self.request(Method::GET, url)).await?;
        let headers = response.headers().clone();
        let value = response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::MalformedPayload {
                message: format!("unexpected API response: {e}"),
            })?;
        Ok((value, headers))
    }

    /// GETs raw file content. A 404 becomes [`ProviderError::NotFound`] for `path`.
    pub(crate) async fn get_file(
        &self,
        url: Url,
        accept: Option<&str>,
        path: &str,
    ) -> Result<Vec<u8>, ProviderError> {
        let mut builder = self.request(Method::GET, url);
        if let Some(accept) = accept {
            builder = builder.header("Accept", accept);
        }
        let response = match self.send(builder).await {
            Err(ProviderError::Api { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                return Err(ProviderError::NotFound {
                    path: path.to_string(),
                })
            }
            other => other?,
        };
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }

    /// POSTs `body` as JSON, discarding the response body.
    pub(crate) async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<(), ProviderError> {
        self.send(self.request(Method::POST, url).json(body))
            .await
            .map(|_| ())
    }
}

/// Target of the `rel="next"` entry in an RFC 8288 `Link` header, as sent by
/// GitHub and Gitea on paginated listings.
pub(crate) fn next_link(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(reqwest::header::LINK)?.to_str().ok()?;
    link.split(',').find_map(|entry| {
        let (target, params) = entry.trim().split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), "rel=\"next\"" | "rel=next"));
        if !is_next {
            return None;
        }
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        Url::parse(target).ok()
    })
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Transport {
        message: err.to_string(),
    }
}
