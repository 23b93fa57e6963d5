//! Authenticated HTTP fetches against upstream registries.

use std::time::Duration;

use bytes::Bytes;
use futures::{stream::BoxStream, StreamExt};
use getset::Getters;
use oci_spec::image::Digest;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use crate::{
    config::{ProxyConfig, UpstreamRegistry, MANIFEST_FETCH_TIMEOUT},
    oci::OCI_MANIFEST_MEDIA_TYPE,
    utils::{DOCKER_HUB_NAMESPACE, PROXY_REPO_PREFIX},
    PortsideError, PortsideResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The Accept header sent on manifest fetches, covering both Docker and OCI
/// manifest flavours.
const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A client for upstream registry fetches, including bearer-token
/// negotiation against the registry's advertised auth realm.
///
/// Tokens are not cached across requests; every 401 challenge negotiates a
/// fresh one. Docker Hub tokens expire after 300 seconds, so per-request
/// negotiation keeps the flow simple at the cost of one extra round-trip.
#[derive(Debug)]
pub struct UpstreamClient {
    /// The HTTP client used to make requests to upstream registries.
    client: ClientWithMiddleware,

    /// The upstream registries known to the proxy.
    registries: Vec<UpstreamRegistry>,
}

/// The outcome of resolving a proxy repository name to an upstream.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ResolvedUpstream {
    /// The configured registry name, e.g. `docker.io`.
    registry_name: String,

    /// The registry endpoint, e.g. `https://registry-1.docker.io`.
    registry_url: String,

    /// The repository name on the upstream, Docker Hub `library/`
    /// normalisation applied.
    repository: String,
}

/// A parsed `WWW-Authenticate` bearer challenge.
#[derive(Debug, PartialEq, Eq)]
struct BearerChallenge {
    realm: String,
    service: Option<String>,
    scope: Option<String>,
}

/// The token endpoint's response body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UpstreamClient {
    /// Creates an upstream client with retrying transport.
    pub fn new(config: &ProxyConfig) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            client,
            registries: config.get_registries().clone(),
        }
    }

    /// Resolves a local `proxy/…` repository name to an upstream registry
    /// and repository.
    ///
    /// The leading `proxy/` is stripped; if the first remaining segment
    /// matches a configured registry name that registry is used, otherwise
    /// the whole path goes to the default registry. Docker Hub single-name
    /// repositories gain the `library/` namespace, so `proxy/docker.io/nginx`
    /// and `proxy/docker.io/library/nginx` resolve identically.
    pub fn resolve(&self, repo: &str) -> PortsideResult<ResolvedUpstream> {
        let stripped = repo.strip_prefix(PROXY_REPO_PREFIX).unwrap_or(repo);

        let (registry, remainder) = match stripped.split_once('/') {
            Some((first, rest)) => match self.registries.iter().find(|r| r.get_name() == first) {
                Some(registry) => (registry, rest),
                None => (self.default_registry(repo)?, stripped),
            },
            None => (self.default_registry(repo)?, stripped),
        };

        if remainder.is_empty() {
            return Err(PortsideError::InvalidRepository(repo.to_string()));
        }

        let repository = if registry.is_docker_hub() && !remainder.contains('/') {
            format!("{}/{}", DOCKER_HUB_NAMESPACE, remainder)
        } else {
            remainder.to_string()
        };

        Ok(ResolvedUpstream {
            registry_name: registry.get_name().clone(),
            registry_url: registry.get_url().clone(),
            repository,
        })
    }

    /// Fetches a manifest by tag or digest, returning the exact bytes and
    /// the upstream's content type.
    pub async fn get_manifest(
        &self,
        upstream: &ResolvedUpstream,
        reference: &str,
    ) -> PortsideResult<(Bytes, String)> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            upstream.registry_url, upstream.repository, reference
        );

        let response = self
            .fetch_with_auth(upstream, &url, MANIFEST_ACCEPT, MANIFEST_FETCH_TIMEOUT)
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PortsideError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(OCI_MANIFEST_MEDIA_TYPE)
            .to_string();

        let bytes = response.bytes().await?;
        Ok((bytes, content_type))
    }

    /// Fetches a blob as a byte stream plus the declared content length.
    /// The caller owns closure of the stream.
    pub async fn get_blob(
        &self,
        upstream: &ResolvedUpstream,
        digest: &Digest,
        timeout: Duration,
    ) -> PortsideResult<(BoxStream<'static, PortsideResult<Bytes>>, Option<u64>)> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            upstream.registry_url, upstream.repository, digest
        );

        tracing::info!("fetching upstream blob {} {}", upstream.repository, digest);

        let response = self
            .fetch_with_auth(upstream, &url, "application/octet-stream", timeout)
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(PortsideError::UpstreamStatus {
                status: status.as_u16(),
                body,
            });
        }

        let length = response.content_length();
        let stream = response
            .bytes_stream()
            .map(|item| item.map_err(PortsideError::from))
            .boxed();

        Ok((stream, length))
    }

    /// Issues a GET, handling one `401` round by negotiating a bearer token
    /// from the advertised realm and reissuing the request.
    async fn fetch_with_auth(
        &self,
        upstream: &ResolvedUpstream,
        url: &str,
        accept: &str,
        timeout: Duration,
    ) -> PortsideResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .timeout(timeout)
            .send()
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get(reqwest::header::WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_bearer_challenge)
            .ok_or_else(|| {
                PortsideError::UpstreamUnauthorized(format!(
                    "401 from {} without a parsable bearer challenge",
                    url
                ))
            })?;

        let token = self.fetch_token(&challenge, upstream).await?;

        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, accept)
            .bearer_auth(token)
            .timeout(timeout)
            .send()
            .await?;

        Ok(response)
    }

    /// Requests a bearer token from the challenge's realm, using configured
    /// registry credentials when present.
    async fn fetch_token(
        &self,
        challenge: &BearerChallenge,
        upstream: &ResolvedUpstream,
    ) -> PortsideResult<String> {
        let mut realm = url::Url::parse(&challenge.realm)
            .map_err(|e| PortsideError::UpstreamUnauthorized(format!("bad realm url: {}", e)))?;

        {
            let mut query = realm.query_pairs_mut();
            if let Some(service) = &challenge.service {
                query.append_pair("service", service);
            }
            if let Some(scope) = &challenge.scope {
                query.append_pair("scope", scope);
            }
        }

        let mut request = self.client.get(realm.as_str());
        if let Some(registry) = self
            .registries
            .iter()
            .find(|r| r.get_name() == &upstream.registry_name)
        {
            if let Some(username) = registry.get_username() {
                request = request.basic_auth(username, registry.get_password().as_deref());
            }
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PortsideError::UpstreamUnauthorized(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        token_response
            .token
            .or(token_response.access_token)
            .ok_or_else(|| {
                PortsideError::UpstreamUnauthorized("token response carried no token".to_string())
            })
    }

    /// Returns the configured default registry.
    fn default_registry(&self, repo: &str) -> PortsideResult<&UpstreamRegistry> {
        self.registries
            .iter()
            .find(|r| *r.get_default())
            .ok_or_else(|| PortsideError::UpstreamNotConfigured(repo.to_string()))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a `WWW-Authenticate: Bearer realm=…,service=…,scope=…` header.
fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let params = header.strip_prefix("Bearer ")?;

    let mut realm = None;
    let mut service = None;
    let mut scope = None;

    for param in params.split(',') {
        let (key, value) = param.trim().split_once('=')?;
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "realm" => realm = Some(value),
            "service" => service = Some(value),
            "scope" => scope = Some(value),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service,
        scope,
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamRegistry as Registry;

    fn client() -> UpstreamClient {
        let config = ProxyConfig::builder()
            .registries(vec![
                Registry::builder()
                    .name("docker.io".to_string())
                    .url("https://registry-1.docker.io".to_string())
                    .default(true)
                    .build(),
                Registry::builder()
                    .name("ghcr.io".to_string())
                    .url("https://ghcr.io".to_string())
                    .build(),
            ])
            .build();
        UpstreamClient::new(&config)
    }

    #[test]
    fn test_upstream_resolve_docker_hub_library_normalisation() {
        let client = client();

        let short = client.resolve("proxy/docker.io/nginx").unwrap();
        let long = client.resolve("proxy/docker.io/library/nginx").unwrap();

        assert_eq!(short, long);
        assert_eq!(short.get_repository(), "library/nginx");
        assert_eq!(short.get_registry_url(), "https://registry-1.docker.io");
    }

    #[test]
    fn test_upstream_resolve_named_registry() {
        let client = client();
        let resolved = client.resolve("proxy/ghcr.io/acme/tool").unwrap();

        assert_eq!(resolved.get_registry_name(), "ghcr.io");
        // Non-hub registries keep single names un-namespaced
        assert_eq!(resolved.get_repository(), "acme/tool");

        let single = client.resolve("proxy/ghcr.io/tool").unwrap();
        assert_eq!(single.get_repository(), "tool");
    }

    #[test]
    fn test_upstream_resolve_unknown_first_segment_uses_default() {
        let client = client();
        // "acme" matches no configured registry name, so the whole path is a
        // Docker Hub repository
        let resolved = client.resolve("proxy/acme/app").unwrap();
        assert_eq!(resolved.get_registry_name(), "docker.io");
        assert_eq!(resolved.get_repository(), "acme/app");
    }

    #[test]
    fn test_upstream_resolve_no_default_configured() {
        let config = ProxyConfig::builder()
            .registries(vec![Registry::builder()
                .name("ghcr.io".to_string())
                .url("https://ghcr.io".to_string())
                .build()])
            .build();
        let client = UpstreamClient::new(&config);

        assert!(matches!(
            client.resolve("proxy/unknown/app"),
            Err(PortsideError::UpstreamNotConfigured(_))
        ));
    }

    #[test]
    fn test_upstream_parse_bearer_challenge() {
        let challenge = parse_bearer_challenge(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/nginx:pull""#,
        )
        .unwrap();

        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service.as_deref(), Some("registry.docker.io"));
        assert_eq!(
            challenge.scope.as_deref(),
            Some("repository:library/nginx:pull")
        );

        assert!(parse_bearer_challenge("Basic realm=\"x\"").is_none());
        assert!(parse_bearer_challenge("Bearer nonsense").is_none());
    }
}
