use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ghtap_polling::{FetchError, Page, PageFetcher, SourcePartition};

use super::client::GitHubClient;

/// The issues listing of one repository, as seen by the poller.
pub struct IssueFetcher {
    client: GitHubClient,
    partition: SourcePartition,
    per_page: usize,
}

impl IssueFetcher {
    pub fn new(client: GitHubClient, partition: SourcePartition, per_page: usize) -> Self {
        Self {
            client,
            partition,
            per_page,
        }
    }
}

#[async_trait]
impl PageFetcher for IssueFetcher {
    async fn fetch(&self, page: u32, since: DateTime<Utc>) -> Result<Page, FetchError> {
        self.client
            .list_issues(&self.partition, page, self.per_page, since)
            .await
            .map_err(FetchError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github::client::GitHubClientConfig;
    use chrono::TimeZone;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn fetch_targets_own_repository() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/repos/rust-lang/cargo/issues"))
            .and(query_param("per_page", "25"))
            .and(query_param("page", "2"))
            .and(query_param("since", "2024-03-05T06:07:08Z"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let client = GitHubClient::new(GitHubClientConfig {
            base_url: "http://localhost".to_string(),
            token: None,
            user_agent: "ghtap-ingest/test".to_string(),
            max_retries: 0,
            timeout_secs: 5,
        })
        .unwrap()
        .with_base_url(&server.uri());

        let fetcher = IssueFetcher::new(client, SourcePartition::new("rust-lang", "cargo"), 25);
        let since = Utc.with_ymd_and_hms(2024, 3, 5, 6, 7, 8).unwrap();

        let page = fetcher.fetch(2, since).await.unwrap();
        assert!(page.issues.is_empty());
    }
}
