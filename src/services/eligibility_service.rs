use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Whether a candidate may be assigned a given test. Lookup failures are
/// reported as errors, not as ineligibility.
#[async_trait]
pub trait EligibilityCheck: Send + Sync {
    async fn is_eligible(&self, candidate_id: Uuid, test_id: Uuid) -> Result<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct AllowAllEligibility;

#[async_trait]
impl EligibilityCheck for AllowAllEligibility {
    async fn is_eligible(&self, _candidate_id: Uuid, _test_id: Uuid) -> Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Deserialize)]
struct EligibilityResponse {
    eligible: bool,
}

#[derive(Clone)]
pub struct HttpEligibility {
    client: Client,
    base_url: String,
}

impl HttpEligibility {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl EligibilityCheck for HttpEligibility {
    async fn is_eligible(&self, candidate_id: Uuid, test_id: Uuid) -> Result<bool> {
        let resp = self
            .client
            .get(format!("{}/candidates/{}/eligibility", self.base_url, candidate_id))
            .query(&[("test_id", test_id.to_string())])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "eligibility lookup answered {}",
                resp.status()
            )));
        }
        let body: EligibilityResponse = resp.json().await?;
        Ok(body.eligible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn lookup_reads_eligible_flag() {
        let server = MockServer::start().await;
        let candidate = Uuid::new_v4();
        let test = Uuid::new_v4();
        Mock::given(method("GET"))
            .and(path(format!("/candidates/{}/eligibility", candidate)))
            .and(query_param("test_id", test.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "eligible": false })))
            .mount(&server)
            .await;

        let check = HttpEligibility::new(Client::new(), server.uri());
        assert!(!check.is_eligible(candidate, test).await.unwrap());
    }

    #[tokio::test]
    async fn lookup_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let check = HttpEligibility::new(Client::new(), server.uri());
        assert!(check.is_eligible(Uuid::new_v4(), Uuid::new_v4()).await.is_err());
    }
}
