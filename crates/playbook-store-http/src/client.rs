use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, instrument};

use playbook_core::domain::record::{NewNodeRecord, RecordPatch};
use playbook_core::{PersistedNodeRecord, RecordId, RecordQuery, Relation, StoreClient, StoreError, StoreResult};

use crate::config::{ConfigError, ODataStoreConfig};
use crate::mapping;

/// Longest response body kept in a [`StoreError::Status`]
const MAX_ERROR_BODY: usize = 512;

/// Store client speaking an OData v4 REST dialect
#[derive(Debug, Clone)]
pub struct ODataStoreClient {
    config: ODataStoreConfig,
    client: Client,
}

impl ODataStoreClient {
    /// Build a client with the configured timeout and OData headers
    pub fn new(config: ODataStoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert("odata-maxversion", HeaderValue::from_static("4.0"));
        headers.insert("odata-version", HeaderValue::from_static("4.0"));

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &ODataStoreConfig {
        &self.config
    }

    fn entity_set_url(&self) -> String {
        format!("{}/{}", self.config.root(), self.config.node_entity_set)
    }

    fn entity_url(&self, id: &RecordId) -> String {
        format!(
            "{}/{}",
            self.config.root(),
            mapping::entity_path(&self.config.node_entity_set, &id.0)
        )
    }

    async fn fetch_page(&self, request: RequestBuilder) -> StoreResult<mapping::Page> {
        let request = match self.config.page_size {
            Some(size) => request.header("Prefer", format!("odata.maxpagesize={}", size)),
            None => request,
        };
        let body: Value = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Serialization(format!("Failed to parse response: {}", e)))?;
        mapping::parse_page(&self.config, &body)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Maps a transport failure to a StoreError
    fn map_http_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_timeout() {
            StoreError::Transport(format!("Request timeout: {}", error))
        } else if error.is_connect() {
            StoreError::Transport(format!("Connection error: {}", error))
        } else {
            StoreError::Transport(format!("HTTP error: {}", error))
        }
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| self.map_http_error(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let mut body = response
            .text()
            .await
            .unwrap_or_else(|_| format!("HTTP error: {}", status));
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }

        match status {
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(body)),
            status => Err(StoreError::Status {
                code: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait]
impl StoreClient for ODataStoreClient {
    #[instrument(skip(self, query), fields(playbook_id = %query.playbook_id))]
    async fn query(&self, query: &RecordQuery) -> StoreResult<Vec<PersistedNodeRecord>> {
        let params = mapping::query_params(&self.config, query);
        let first = self.client.get(self.entity_set_url()).query(&params);

        let mut page = self.fetch_page(first).await?;
        let mut records = std::mem::take(&mut page.records);
        let mut pages = 1;
        while let Some(next_link) = page.next_link.take() {
            // The link already carries the query options and the skip token
            page = self.fetch_page(self.client.get(next_link.as_str())).await?;
            if page.next_link.as_deref() == Some(next_link.as_str()) {
                return Err(StoreError::Serialization(format!(
                    "next page link repeats itself: {}",
                    next_link
                )));
            }
            records.append(&mut page.records);
            pages += 1;
        }

        debug!(records = records.len(), pages, "Loaded node records");
        Ok(records)
    }

    #[instrument(skip(self, record), fields(node_id = %record.client_ref))]
    async fn create(&self, record: NewNodeRecord) -> StoreResult<RecordId> {
        let body = mapping::create_body(&self.config, &record);
        let request = self
            .client
            .post(self.entity_set_url())
            .header("Prefer", "return=representation")
            .json(&body);

        let response = self.send(request).await?;

        let from_header = response
            .headers()
            .get("odata-entityid")
            .and_then(|value| value.to_str().ok())
            .and_then(mapping::entity_id_from_header);
        if let Some(id) = from_header {
            debug!(record_id = %id, "Created node record");
            return Ok(id);
        }

        if response.status() == StatusCode::NO_CONTENT {
            return Err(StoreError::Serialization(
                "create response carried no entity id".to_string(),
            ));
        }
        let created: Value = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(format!("Failed to parse response: {}", e)))?;
        let id = created
            .get(&self.config.fields.id)
            .and_then(Value::as_str)
            .map(|id| RecordId(id.to_string()))
            .ok_or_else(|| {
                StoreError::Serialization("create response carried no entity id".to_string())
            })?;
        debug!(record_id = %id, "Created node record");
        Ok(id)
    }

    #[instrument(skip(self, patch), fields(record_id = %id))]
    async fn update(&self, id: &RecordId, patch: RecordPatch) -> StoreResult<()> {
        let body = mapping::patch_body(&self.config, &patch);
        let request = self
            .client
            .patch(self.entity_url(id))
            .header("If-Match", "*")
            .json(&body);
        self.send(request).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id))]
    async fn delete(&self, id: &RecordId) -> StoreResult<()> {
        self.send(self.client.delete(self.entity_url(id))).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id, relation = %relation))]
    async fn associate(&self, id: &RecordId, relation: Relation, related_id: &str) -> StoreResult<()> {
        let endpoint = self.config.relation(relation);
        let url = format!("{}/{}/$ref", self.entity_url(id), endpoint.navigation);
        let body = json!({
            "@odata.id": format!(
                "{}/{}",
                self.config.root(),
                mapping::entity_path(&endpoint.entity_set, related_id)
            ),
        });
        self.send(self.client.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(record_id = %id, relation = %relation))]
    async fn disassociate(
        &self,
        id: &RecordId,
        relation: Relation,
        related_id: &str,
    ) -> StoreResult<()> {
        let endpoint = self.config.relation(relation);
        let url = format!(
            "{}/{}/$ref",
            self.entity_url(id),
            mapping::entity_path(&endpoint.navigation, related_id)
        );
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}
