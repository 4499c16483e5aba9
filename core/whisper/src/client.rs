use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use url::Url;

use crate::{
    FilterId, FilterKey, KeyId, Post, PostTarget, Topic, Whisper, WhisperError, WhisperMessage,
};

/// Proof-of-work and lifetime parameters applied to every post.
#[derive(Clone, Debug)]
pub struct PostOptions {
    pub ttl: u32,
    pub pow_time: f64,
    pub pow_target: f64,
}

impl Default for PostOptions {
    fn default() -> Self {
        PostOptions {
            ttl: 60,
            pow_time: 1.0,
            pow_target: 2.5,
        }
    }
}

/// `shh_*` JSON-RPC client.
pub struct WhisperClient {
    http: reqwest::Client,
    url: Url,
    options: PostOptions,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    hash: String,
    topic: String,
    payload: String,
    #[serde(default)]
    timestamp: u64,
}

impl WhisperClient {
    pub fn new(url: Url, timeout: Duration, options: PostOptions) -> Result<Self, WhisperError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| WhisperError::Http {
                method: "<client>".to_string(),
                error,
            })?;
        Ok(WhisperClient {
            http,
            url,
            options,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, WhisperError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        log::trace!("Whisper RPC call [{}]", method);

        let http_error = |error| WhisperError::Http {
            method: method.to_string(),
            error,
        };
        let response: RpcResponse = self
            .http
            .post(self.url.clone())
            .json(&request)
            .send()
            .await
            .map_err(http_error)?
            .error_for_status()
            .map_err(http_error)?
            .json()
            .await
            .map_err(http_error)?;

        if let Some(error) = response.error {
            return Err(classify_rpc_error(method, &request.params, error));
        }

        let result = response.result.unwrap_or(Value::Null);
        serde_json::from_value(result).map_err(|e| WhisperError::Decode {
            method: method.to_string(),
            error: e.to_string(),
        })
    }
}

fn classify_rpc_error(method: &str, params: &Value, error: RpcErrorBody) -> WhisperError {
    if error.message.to_lowercase().contains("filter not found") {
        let filter_id = params
            .get(0)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return WhisperError::FilterNotFound(filter_id);
    }
    WhisperError::Rpc {
        method: method.to_string(),
        code: error.code,
        message: error.message,
    }
}

fn decode_payload(method: &str, payload: &str) -> Result<Vec<u8>, WhisperError> {
    hex::decode(payload.trim_start_matches("0x")).map_err(|e| WhisperError::Decode {
        method: method.to_string(),
        error: format!("payload is not hex: {}", e),
    })
}

#[async_trait]
impl Whisper for WhisperClient {
    async fn post(&self, post: Post) -> Result<bool, WhisperError> {
        let mut params = json!({
            "ttl": self.options.ttl,
            "topic": post.topic.to_string(),
            "payload": format!("0x{}", hex::encode(&post.payload)),
            "powTime": self.options.pow_time,
            "powTarget": self.options.pow_target,
        });
        match post.target {
            PostTarget::SymKey(key) => params["symKeyID"] = Value::String(key),
            PostTarget::PublicKey(key) => params["pubKey"] = Value::String(key),
        }
        self.call("shh_post", json!([params])).await
    }

    async fn new_message_filter(
        &self,
        topics: Vec<Topic>,
        key: FilterKey,
    ) -> Result<FilterId, WhisperError> {
        let topics: Vec<String> = topics.iter().map(Topic::to_string).collect();
        let mut criteria = json!({ "topics": topics });
        match key {
            FilterKey::SymKey(key) => criteria["symKeyID"] = Value::String(key),
            FilterKey::PrivateKey(key) => criteria["privateKeyID"] = Value::String(key),
        }
        self.call("shh_newMessageFilter", json!([criteria])).await
    }

    async fn delete_message_filter(&self, filter_id: &str) -> Result<bool, WhisperError> {
        self.call("shh_deleteMessageFilter", json!([filter_id])).await
    }

    async fn get_filter_messages(
        &self,
        filter_id: &str,
    ) -> Result<Vec<WhisperMessage>, WhisperError> {
        const METHOD: &str = "shh_getFilterMessages";
        let raw: Vec<RawMessage> = self.call(METHOD, json!([filter_id])).await?;

        raw.into_iter()
            .map(|msg| {
                Ok(WhisperMessage {
                    topic: msg.topic.parse().map_err(|e: crate::TopicParseError| {
                        WhisperError::Decode {
                            method: METHOD.to_string(),
                            error: e.to_string(),
                        }
                    })?,
                    payload: decode_payload(METHOD, &msg.payload)?,
                    hash: msg.hash,
                    timestamp: msg.timestamp,
                })
            })
            .collect()
    }

    async fn generate_sym_key_from_password(&self, password: &str) -> Result<KeyId, WhisperError> {
        self.call("shh_generateSymKeyFromPassword", json!([password]))
            .await
    }

    async fn new_key_pair(&self) -> Result<KeyId, WhisperError> {
        self.call("shh_newKeyPair", json!([])).await
    }

    async fn get_public_key(&self, keypair_id: &str) -> Result<String, WhisperError> {
        self.call("shh_getPublicKey", json!([keypair_id])).await
    }

    async fn delete_key_pair(&self, keypair_id: &str) -> Result<bool, WhisperError> {
        self.call("shh_deleteKeyPair", json!([keypair_id])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_not_found_is_classified() {
        let error = classify_rpc_error(
            "shh_getFilterMessages",
            &json!(["abc123"]),
            RpcErrorBody {
                code: -32000,
                message: "filter not found".to_string(),
            },
        );
        match error {
            WhisperError::FilterNotFound(id) => assert_eq!(id, "abc123"),
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_other_rpc_errors_keep_context() {
        let error = classify_rpc_error(
            "shh_post",
            &json!([{}]),
            RpcErrorBody {
                code: -32000,
                message: "message rejected, PoW too low".to_string(),
            },
        );
        assert!(!error.is_filter_not_found());
        assert!(error.to_string().contains("shh_post"));
    }

    #[test]
    fn test_decode_payload() {
        assert_eq!(decode_payload("m", "0x7b7d").unwrap(), b"{}".to_vec());
        assert!(decode_payload("m", "0xzz").is_err());
    }
}
