//! Remote record gateway.
//!
//! The store talks to the cloud through the [`RecordGateway`] and
//! [`AccountProbe`] traits; [`HttpRecordGateway`] is the production
//! implementation against the LexiLens record service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::records::LearningRecord;
use crate::sync::AccountState;

/// Remote push/fetch requests time out after this long and count as failed.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Cloud error: {0}")]
    Api(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// Upsert/delete/enumerate interface over the remote record set, keyed by
/// record id.
#[async_trait]
pub trait RecordGateway: Send + Sync {
    /// Upserts the given records by id.
    async fn save_records(&self, records: &[LearningRecord]) -> Result<(), GatewayError>;

    /// Deletes the remote records with the given ids.
    async fn delete_records(&self, ids: &[Uuid]) -> Result<(), GatewayError>;

    /// Enumerates the full remote record set.
    async fn fetch_all(&self) -> Result<Vec<LearningRecord>, GatewayError>;
}

/// Queries whether a usable remote account session exists.
#[async_trait]
pub trait AccountProbe: Send + Sync {
    async fn account_state(&self) -> Result<AccountState, GatewayError>;
}

/// Record shape on the wire: one object per record, keyed by `id`.
#[derive(Debug, Serialize, Deserialize)]
struct WireRecord {
    id: Uuid,
    #[serde(rename = "objectName")]
    object_name: String,
    #[serde(rename = "nativeTranslation")]
    native_translation: String,
    #[serde(rename = "learningTranslation")]
    learning_translation: String,
    #[serde(rename = "nativeLanguageCode")]
    native_language_code: String,
    #[serde(rename = "learningLanguageCode")]
    learning_language_code: String,
    #[serde(rename = "createdAt")]
    created_at: DateTime<Utc>,
}

impl From<&LearningRecord> for WireRecord {
    fn from(record: &LearningRecord) -> Self {
        Self {
            id: record.id,
            object_name: record.object_name.clone(),
            native_translation: record.native_translation.clone(),
            learning_translation: record.learning_translation.clone(),
            native_language_code: record.native_language_code.clone(),
            learning_language_code: record.learning_language_code.clone(),
            created_at: record.created_at,
        }
    }
}

impl From<WireRecord> for LearningRecord {
    fn from(wire: WireRecord) -> Self {
        Self {
            id: wire.id,
            created_at: wire.created_at,
            object_name: wire.object_name,
            native_translation: wire.native_translation,
            learning_translation: wire.learning_translation,
            native_language_code: wire.native_language_code,
            learning_language_code: wire.learning_language_code,
        }
    }
}

/// Records missing any required field are skipped, not treated as a fetch
/// error.
fn decode_wire_records(values: Vec<serde_json::Value>) -> Vec<LearningRecord> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<WireRecord>(value) {
            Ok(wire) => Some(LearningRecord::from(wire)),
            Err(e) => {
                log::debug!("Skipping malformed remote record: {e}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Serialize)]
struct SaveRecordsRequest {
    records: Vec<WireRecord>,
}

#[derive(Debug, Serialize)]
struct DeleteRecordsRequest {
    ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
struct FetchRecordsResponse {
    records: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
struct AccountStatusResponse {
    status: String,
}

pub struct HttpRecordGateway {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRecordGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        if response.status() == 401 {
            return Err(GatewayError::Unauthorized);
        }

        if !response.status().is_success() {
            let error: ApiErrorResponse = response.json().await.unwrap_or(ApiErrorResponse {
                message: "Unknown error".to_string(),
            });
            return Err(GatewayError::Api(error.message));
        }

        Ok(response)
    }
}

#[async_trait]
impl RecordGateway for HttpRecordGateway {
    async fn save_records(&self, records: &[LearningRecord]) -> Result<(), GatewayError> {
        let request = SaveRecordsRequest {
            records: records.iter().map(WireRecord::from).collect(),
        };

        let response = self
            .client
            .post(format!("{}/records", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        self.check(response).await?;
        log::info!("Pushed {} records to cloud", records.len());
        Ok(())
    }

    async fn delete_records(&self, ids: &[Uuid]) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(format!("{}/records/delete", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&DeleteRecordsRequest { ids: ids.to_vec() })
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        self.check(response).await?;
        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<LearningRecord>, GatewayError> {
        let response = self
            .client
            .get(format!("{}/records", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let body: FetchRecordsResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        Ok(decode_wire_records(body.records))
    }
}

#[async_trait]
impl AccountProbe for HttpRecordGateway {
    async fn account_state(&self) -> Result<AccountState, GatewayError> {
        let response = self
            .client
            .get(format!("{}/account/status", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        match response.status().as_u16() {
            401 => return Ok(AccountState::NoAccount),
            403 => return Ok(AccountState::Restricted),
            _ => {}
        }

        let body: AccountStatusResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Request(e.to_string()))?;

        let state = match body.status.as_str() {
            "available" => AccountState::Available,
            "no_account" => AccountState::NoAccount,
            "restricted" => AccountState::Restricted,
            _ => AccountState::CouldNotDetermine,
        };
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> LearningRecord {
        LearningRecord {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            object_name: "apple".to_string(),
            native_translation: "苹果".to_string(),
            learning_translation: "Apple".to_string(),
            native_language_code: "zh".to_string(),
            learning_language_code: "en".to_string(),
        }
    }

    #[test]
    fn wire_conversion_round_trips() {
        let original = record();
        let wire = WireRecord::from(&original);
        let back = LearningRecord::from(wire);
        assert_eq!(back, original);
    }

    #[test]
    fn wire_records_use_camel_case_fields() {
        let value = serde_json::to_value(WireRecord::from(&record())).unwrap();
        assert!(value.get("objectName").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("nativeLanguageCode").is_some());
    }

    #[test]
    fn malformed_remote_records_are_skipped() {
        let good = serde_json::to_value(WireRecord::from(&record())).unwrap();
        let missing_name = json!({
            "id": Uuid::new_v4(),
            "nativeTranslation": "苹果",
            "learningTranslation": "Apple",
            "nativeLanguageCode": "zh",
            "learningLanguageCode": "en",
            "createdAt": Utc::now(),
        });
        let garbage = json!("not a record");

        let decoded = decode_wire_records(vec![good, missing_name, garbage]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].object_name, "apple");
    }

    #[test]
    fn created_at_decodes_from_iso8601() {
        let value = json!({
            "id": Uuid::new_v4(),
            "objectName": "book",
            "nativeTranslation": "书",
            "learningTranslation": "Book",
            "nativeLanguageCode": "zh",
            "learningLanguageCode": "en",
            "createdAt": "2026-08-30T12:00:00Z",
        });
        let decoded = decode_wire_records(vec![value]);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].created_at.to_rfc3339(), "2026-08-30T12:00:00+00:00");
    }
}
