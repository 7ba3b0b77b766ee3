use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Result, eyre};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::cli::chat::session::SessionToken;

const SEARCH_PATH: &str = "api/search";

/// What the user sees for any failed search. The underlying cause is logged.
pub const SEARCH_FAILED_MESSAGE: &str = "An error occurred while searching. Please try again.";

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search service returned status {0}")]
    Status(u16),

    #[error("search request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("search response could not be parsed: {0}")]
    Protocol(#[source] serde_json::Error),
}

impl SearchError {
    pub fn user_message(&self) -> &'static str {
        SEARCH_FAILED_MESSAGE
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    session_id: &'a str,
}

/// One turn's answer from the recommendation service.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub ready_for_recommendation: bool,
    #[serde(default)]
    pub recommendation: Option<String>,
    #[serde(default)]
    pub follow_up_question: Option<String>,
    #[serde(default)]
    pub citations: Option<Vec<Record>>,
}

/// A single attribute of a result record.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
    List(Vec<AttributeValue>),
}

impl AttributeValue {
    /// Default textual form. Nulls inside a list come out empty, and nested
    /// lists are joined with a bare comma.
    pub fn to_text(&self) -> String {
        match self {
            AttributeValue::Null => String::new(),
            AttributeValue::Bool(value) => value.to_string(),
            AttributeValue::Number(number) => number_text(number),
            AttributeValue::Text(text) => text.clone(),
            AttributeValue::List(items) => items
                .iter()
                .map(AttributeValue::to_text)
                .collect::<Vec<String>>()
                .join(","),
        }
    }
}

/// Shortest plain rendering: `10` rather than `10.0`.
pub fn number_text(number: &serde_json::Number) -> String {
    if let Some(value) = number.as_i64() {
        value.to_string()
    } else if let Some(value) = number.as_u64() {
        value.to_string()
    } else {
        number.as_f64().map(|value| value.to_string()).unwrap_or_else(|| number.to_string())
    }
}

/// One result item. Attributes keep the order they arrived in; the set of
/// attributes may differ from record to record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    attributes: Vec<(String, AttributeValue)>,
}

impl Record {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|(name, _)| name.as_str())
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// A repeated name keeps its original position and takes the new value.
    pub fn insert(&mut self, name: String, value: AttributeValue) {
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some((_, existing)) => *existing = value,
            None => self.attributes.push((name, value)),
        }
    }

}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a result record object")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Record, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut record = Record::default();
                while let Some((name, value)) = map.next_entry::<String, AttributeValue>()? {
                    record.insert(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// The recommendation service as seen by the chat loop.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(
        &self,
        query: &str,
        session: &SessionToken,
    ) -> std::result::Result<SearchResponse, SearchError>;
}

#[derive(Debug)]
pub struct SearchClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl SearchClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(eyre!("Search API URL is not set (use --api-url or SEARCH_API_URL)"));
        }

        let endpoint = Url::parse(&format!("{}/{}", base_url.trim_end_matches('/'), SEARCH_PATH))
            .map_err(|e| eyre!("Invalid search API URL '{}': {}", base_url, e))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(eyre!("Search API URL must be http or https: {}", base_url));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl SearchBackend for SearchClient {
    async fn search(
        &self,
        query: &str,
        session: &SessionToken,
    ) -> std::result::Result<SearchResponse, SearchError> {
        let request_body = SearchRequest {
            query,
            session_id: session.as_str(),
        };

        debug!("Sending search request to {}: {:?}", self.endpoint, request_body);

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!("Search request failed: {}", e);
                SearchError::Transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Search request failed with status {}: {}", status, error_text);
            return Err(SearchError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(|e| {
            error!("Failed to read search response body: {}", e);
            SearchError::Transport(e)
        })?;

        debug!("Received search response: {}", body);

        serde_json::from_str(&body).map_err(|e| {
            error!("Malformed search response ({}): {}", e, body);
            SearchError::Protocol(e)
        })
    }
}
