//! ---
//! pde_section: "01-core-functionality"
//! pde_subsection: "module"
//! pde_type: "source"
//! pde_scope: "code"
//! pde_description: "Primary reconciliation and lifecycle management."
//! pde_version: "v0.0.0-prealpha"
//! pde_owner: "tbd"
//! ---
//! `reqwest` implementations of the collaborator traits. Every client is
//! built with a request timeout so a stalled peer cannot hold up a pass.

use std::time::Duration;

use async_trait::async_trait;
use pde_model::{LiveSystem, OrchestrationRule, RuleId, RuleSpec, ServiceEndpoint};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::collaborators::{LivenessProbe, RuleOrchestrator, SystemRegistry};
use crate::error::CollaboratorError;

type Result<T> = std::result::Result<T, CollaboratorError>;

/// Collection payloads come either bare or wrapped in `{"data": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped { data: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items) | Listing::Wrapped { data: items } => items,
        }
    }
}

fn build_client(timeout: Duration) -> Result<Client> {
    Ok(Client::builder().timeout(timeout).build()?)
}

fn parse_base(base_url: &str) -> Result<Url> {
    let url = Url::parse(base_url).map_err(|err| CollaboratorError::InvalidUrl(format!("{base_url}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(CollaboratorError::InvalidUrl(base_url.to_owned()));
    }
    Ok(url)
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| CollaboratorError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn map_send_error(err: reqwest::Error, timeout: Duration) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout(timeout)
    } else {
        CollaboratorError::Http(err)
    }
}

fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CollaboratorError::Status {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}

async fn get_listing<T: DeserializeOwned>(client: &Client, url: Url, timeout: Duration) -> Result<Vec<T>> {
    debug!(%url, "registry request");
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|err| map_send_error(err, timeout))?;
    let listing: Listing<T> = check_status(response)?
        .json()
        .await
        .map_err(|err| map_send_error(err, timeout))?;
    Ok(listing.into_vec())
}

/// Registry client: `GET {base}/systems` and `GET {base}/services?name=`.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
            timeout,
        })
    }
}

#[async_trait]
impl SystemRegistry for HttpRegistryClient {
    async fn systems(&self) -> Result<Vec<LiveSystem>> {
        let url = endpoint(&self.base, &["systems"])?;
        get_listing(&self.client, url, self.timeout).await
    }

    async fn services(&self, service_definition: &str) -> Result<Vec<ServiceEndpoint>> {
        let mut url = endpoint(&self.base, &["services"])?;
        url.query_pairs_mut().append_pair("name", service_definition);
        get_listing(&self.client, url, self.timeout).await
    }
}

/// Orchestrator client: `POST {base}/rules` and `DELETE {base}/rules/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRuleOrchestrator {
    client: Client,
    base: Url,
    timeout: Duration,
}

impl HttpRuleOrchestrator {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
            timeout,
        })
    }
}

#[async_trait]
impl RuleOrchestrator for HttpRuleOrchestrator {
    async fn create_rules(&self, rules: &[RuleSpec]) -> Result<Vec<OrchestrationRule>> {
        let url = endpoint(&self.base, &["rules"])?;
        debug!(%url, count = rules.len(), "creating orchestration rules");
        let response = self
            .client
            .post(url)
            .json(rules)
            .send()
            .await
            .map_err(|err| map_send_error(err, self.timeout))?;
        let created: Listing<OrchestrationRule> = check_status(response)?
            .json()
            .await
            .map_err(|err| map_send_error(err, self.timeout))?;
        let created = created.into_vec();
        if created.len() != rules.len() {
            return Err(CollaboratorError::Rejected(format!(
                "requested {} rules, orchestrator returned {}",
                rules.len(),
                created.len()
            )));
        }
        Ok(created)
    }

    async fn delete_rule(&self, id: RuleId) -> Result<()> {
        let id = id.to_string();
        let url = endpoint(&self.base, &["rules", id.as_str()])?;
        let response = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|err| map_send_error(err, self.timeout))?;
        check_status(response)?;
        Ok(())
    }
}

/// Liveness probe: `GET http://{address}:{port}/ping`, expecting 200.
#[derive(Debug, Clone)]
pub struct HttpLivenessProbe {
    client: Client,
    timeout: Duration,
}

impl HttpLivenessProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
        })
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn ping(&self, address: &str, port: u16) -> Result<()> {
        let raw = format!("http://{address}:{port}/ping");
        let url = Url::parse(&raw).map_err(|err| CollaboratorError::InvalidUrl(format!("{raw}: {err}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| map_send_error(err, self.timeout))?;
        if response.status() != StatusCode::OK {
            return Err(CollaboratorError::Status {
                url: raw,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_extend_the_base_path() {
        let base = parse_base("http://127.0.0.1:8441/orchestrator").unwrap();
        assert_eq!(
            endpoint(&base, &["rules", "42"]).unwrap().as_str(),
            "http://127.0.0.1:8441/orchestrator/rules/42"
        );
        let trailing = parse_base("http://127.0.0.1:8443/serviceregistry/").unwrap();
        assert_eq!(
            endpoint(&trailing, &["systems"]).unwrap().as_str(),
            "http://127.0.0.1:8443/serviceregistry/systems"
        );
    }

    #[test]
    fn listings_accept_both_shapes() {
        let bare: Listing<i64> = serde_json::from_str("[1, 2]").unwrap();
        let wrapped: Listing<i64> = serde_json::from_str(r#"{"data": [3]}"#).unwrap();
        assert_eq!(bare.into_vec(), vec![1, 2]);
        assert_eq!(wrapped.into_vec(), vec![3]);
    }

    #[test]
    fn non_http_base_is_rejected() {
        assert!(matches!(
            HttpRegistryClient::new("mailto:ops@example.invalid", Duration::from_secs(1)),
            Err(CollaboratorError::InvalidUrl(_))
        ));
    }
}
