use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{check_append, parse_records, serialize_records, IssuanceRecord, LedgerStore};
use crate::error::LedgerError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub token: String,
    /// `owner/repo`
    pub repo: String,
    /// Path of the ledger file inside the repository.
    pub path: String,
    pub branch: Option<String>,
    pub api_url: String,
}

/// Revision of the remote file as of the last load.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Revision {
    Missing,
    Sha(String),
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    content: Option<ContentMeta>,
}

#[derive(Debug, Deserialize)]
struct ContentMeta {
    sha: String,
}

/// Ledger stored as a CSV file in a GitHub repository, read and written
/// through the contents API.
///
/// Appends are guarded by the file's blob sha: if another writer changed the
/// file after this handle last loaded it, the append fails with
/// [`LedgerError::Conflict`] instead of overwriting their record.
pub struct GitHubLedger {
    client: Client,
    settings: RemoteSettings,
    seen: Mutex<Option<Revision>>,
}

impl GitHubLedger {
    pub fn new(settings: RemoteSettings) -> Result<Self, LedgerError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            settings,
            seen: Mutex::new(None),
        })
    }

    fn contents_url(&self) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.repo,
            self.settings.path.trim_start_matches('/')
        )
    }

    fn remember(&self, revision: Revision) {
        if let Ok(mut seen) = self.seen.lock() {
            *seen = Some(revision);
        }
    }

    fn last_seen(&self) -> Option<Revision> {
        self.seen.lock().ok().and_then(|seen| seen.clone())
    }

    async fn fetch(&self) -> Result<(Vec<IssuanceRecord>, Revision), LedgerError> {
        let mut request = self
            .client
            .get(self.contents_url())
            .bearer_auth(&self.settings.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "certifier");
        if let Some(branch) = &self.settings.branch {
            request = request.query(&[("ref", branch)]);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok((Vec::new(), Revision::Missing));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let body: ContentsResponse = response.json().await?;
        let encoded: String = body.content.chars().filter(|c| !c.is_whitespace()).collect();
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| LedgerError::Corrupt(format!("remote content is not base64: {}", e)))?;

        Ok((parse_records(&bytes)?, Revision::Sha(body.sha)))
    }
}

#[async_trait]
impl LedgerStore for GitHubLedger {
    fn backend(&self) -> &'static str {
        "github"
    }

    async fn load(&self) -> Result<Vec<IssuanceRecord>, LedgerError> {
        let (records, revision) = self.fetch().await?;
        if revision == Revision::Missing {
            warn!(repo = %self.settings.repo, path = %self.settings.path, "Remote ledger not found, treating as empty");
        }
        debug!(rows = records.len(), ?revision, "Remote ledger loaded");
        self.remember(revision);
        Ok(records)
    }

    /// The revision check covers writes that land between this handle's last
    /// `load` and the refetch below. Writes between the refetch and the PUT
    /// are caught by the server rejecting the stale sha (409/422).
    async fn append(&self, record: &IssuanceRecord) -> Result<(), LedgerError> {
        let (mut records, current) = self.fetch().await?;

        if let Some(seen) = self.last_seen() {
            if seen != current {
                return Err(LedgerError::Conflict(format!(
                    "{} was modified by another writer",
                    self.settings.path
                )));
            }
        }

        check_append(&records, record)?;
        records.push(record.clone());
        let content = STANDARD.encode(serialize_records(&records)?);

        let sha = match &current {
            Revision::Sha(sha) => Some(sha.as_str()),
            Revision::Missing => None,
        };
        let body = UpdateRequest {
            message: format!("Record certificate {}", record.serial_number),
            content,
            sha,
            branch: self.settings.branch.as_deref(),
        };

        let response = self
            .client
            .put(self.contents_url())
            .bearer_auth(&self.settings.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, "certifier")
            .json(&body)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::Conflict(message));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(LedgerError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        let updated: UpdateResponse = response.json().await?;
        match updated.content {
            Some(meta) => self.remember(Revision::Sha(meta.sha)),
            None => {
                if let Ok(mut seen) = self.seen.lock() {
                    *seen = None;
                }
            }
        }

        info!(serial = %record.serial_number, rows = records.len(), "Remote ledger updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::sample_record;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FILE_PATH: &str = "/repos/acme/certs/contents/certificates.csv";

    fn settings(server: &MockServer) -> RemoteSettings {
        RemoteSettings {
            token: "secret-token".to_string(),
            repo: "acme/certs".to_string(),
            path: "certificates.csv".to_string(),
            branch: None,
            api_url: server.uri(),
        }
    }

    fn contents_body(records: &[IssuanceRecord], sha: &str) -> serde_json::Value {
        let encoded = STANDARD.encode(serialize_records(records).unwrap());
        // The API wraps base64 content at 60 columns.
        let wrapped = encoded
            .as_bytes()
            .chunks(60)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        json!({ "sha": sha, "content": wrapped, "encoding": "base64" })
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_decodes_content_with_bearer_token() {
        let server = MockServer::start().await;
        let records = vec![sample_record(1, "PY2025-0001"), sample_record(2, "PY2025-0002")];
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(&records, "abc")))
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        assert_eq!(ledger.load().await.unwrap(), records);
        assert_eq!(ledger.load().await.unwrap(), records);
    }

    #[tokio::test]
    async fn load_passes_branch_as_ref() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .and(query_param("ref", "ledger"))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(&[], "abc")))
            .mount(&server)
            .await;

        let mut settings = settings(&server);
        settings.branch = Some("ledger".to_string());
        let ledger = GitHubLedger::new(settings).unwrap();
        assert!(ledger.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        let err = ledger.load().await.unwrap_err();
        assert!(matches!(err, LedgerError::Remote { status: 500, .. }));
    }

    #[tokio::test]
    async fn append_creates_missing_file_without_sha() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "content": { "sha": "new" } })))
            .expect(1)
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        ledger.load().await.unwrap();
        let record = sample_record(1, "PY2025-0001");
        ledger.append(&record).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let put = requests
            .iter()
            .find(|r| r.method.as_str() == "PUT")
            .unwrap();
        let body: serde_json::Value = put.body_json().unwrap();
        assert!(body.get("sha").is_none());
        let content = STANDARD.decode(body["content"].as_str().unwrap()).unwrap();
        assert_eq!(parse_records(&content).unwrap(), vec![record]);
    }

    #[tokio::test]
    async fn append_updates_with_current_sha() {
        let server = MockServer::start().await;
        let existing = vec![sample_record(1, "PY2025-0001")];
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(&existing, "abc")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": { "sha": "def" } })))
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        ledger.load().await.unwrap();
        ledger.append(&sample_record(2, "PY2025-0002")).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        let put = requests.iter().find(|r| r.method.as_str() == "PUT").unwrap();
        let body: serde_json::Value = put.body_json().unwrap();
        assert_eq!(body["sha"], "abc");
        let content = STANDARD.decode(body["content"].as_str().unwrap()).unwrap();
        assert_eq!(parse_records(&content).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn append_refuses_when_revision_moved_since_load() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(&[], "first")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(
                &[sample_record(1, "PY2025-0001")],
                "second",
            )))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": { "sha": "x" } })))
            .expect(0)
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        assert!(ledger.load().await.unwrap().is_empty());

        let err = ledger.append(&sample_record(1, "PY2025-0001")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
    }

    #[tokio::test]
    async fn server_side_sha_conflict_maps_to_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(contents_body(&[], "abc")))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(FILE_PATH))
            .respond_with(ResponseTemplate::new(409).set_body_string("sha does not match"))
            .mount(&server)
            .await;

        let ledger = GitHubLedger::new(settings(&server)).unwrap();
        let err = ledger.append(&sample_record(1, "PY2025-0001")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(m) if m.contains("sha")));
    }
}
