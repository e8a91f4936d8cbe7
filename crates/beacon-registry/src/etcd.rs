//! etcd coordination store backend
//!
//! Speaks the etcd v2 keys HTTP API: conditional writes via
//! `prevValue`/`prevIndex`/`prevExist` form parameters, TTL leases
//! with `refresh`, and blocking watches via `wait=true` long-polls.
//! Endpoints are tried in order on transport failure.

use crate::error::{RegistryError, RegistryResult};
use crate::store::{DeleteOptions, RegistryStore, SetOptions, StoreNode, StoreWatch};
use async_trait::async_trait;
use beacon_core::constants::STORE_REQUEST_TIMEOUT_MS;
use serde::Deserialize;
use std::time::Duration;

// etcd v2 error codes
const ECODE_KEY_NOT_FOUND: u64 = 100;
const ECODE_TEST_FAILED: u64 = 101;
const ECODE_NODE_EXIST: u64 = 105;
const ECODE_DIR_NOT_EMPTY: u64 = 108;

/// etcd-backed store client
pub struct EtcdStore {
    endpoints: Vec<String>,
    /// Client for plain requests, bounded by the per-request timeout
    http: reqwest::Client,
    /// Client for long-poll watches, no timeout
    watch_http: reqwest::Client,
}

impl EtcdStore {
    /// Build a client from a comma-separated endpoint list
    ///
    /// e.g. `"http://127.0.0.1:2379,http://127.0.0.1:12379"`
    pub fn connect(endpoints: &str) -> RegistryResult<Self> {
        let endpoints: Vec<String> = endpoints
            .split(',')
            .map(|e| e.trim().trim_end_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();

        if endpoints.is_empty() {
            return Err(RegistryError::store_unavailable("no store endpoints"));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(STORE_REQUEST_TIMEOUT_MS))
            .build()
            .map_err(|e| RegistryError::store_unavailable(e.to_string()))?;
        let watch_http = reqwest::Client::builder()
            .build()
            .map_err(|e| RegistryError::store_unavailable(e.to_string()))?;

        Ok(Self {
            endpoints,
            http,
            watch_http,
        })
    }

    async fn try_endpoints(
        &self,
        make: impl Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder,
    ) -> RegistryResult<reqwest::Response> {
        let mut last_error: Option<reqwest::Error> = None;
        for endpoint in &self.endpoints {
            match make(&self.http, endpoint).send().await {
                Ok(response) => return Ok(response),
                Err(e) => last_error = Some(e),
            }
        }
        Err(RegistryError::store_unavailable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no reachable endpoint".into()),
        ))
    }
}

fn key_url(endpoint: &str, path: &str) -> String {
    format!("{}/v2/keys/{}", endpoint, path)
}

fn ttl_seconds(ttl_ms: u64) -> u64 {
    ttl_ms.div_ceil(1_000)
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    node: Option<WireNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireNode {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default)]
    dir: bool,
    #[serde(default)]
    nodes: Vec<WireNode>,
    #[serde(default)]
    modified_index: u64,
}

impl WireNode {
    fn into_store_node(self) -> StoreNode {
        StoreNode {
            key: self.key,
            value: self.value,
            dir: self.dir,
            nodes: self.nodes.into_iter().map(Self::into_store_node).collect(),
            modified_revision: self.modified_index,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireError {
    error_code: u64,
    #[serde(default)]
    message: String,
}

fn map_error_code(path: &str, err: WireError) -> RegistryError {
    match err.error_code {
        ECODE_KEY_NOT_FOUND => RegistryError::not_found(path),
        ECODE_TEST_FAILED | ECODE_NODE_EXIST => RegistryError::compare_failed(path),
        ECODE_DIR_NOT_EMPTY => RegistryError::DirectoryNotEmpty {
            path: path.to_string(),
        },
        code => RegistryError::store_unavailable(format!(
            "etcd error {} for {}: {}",
            code, path, err.message
        )),
    }
}

async fn parse_node(path: &str, response: reqwest::Response) -> RegistryResult<WireNode> {
    let status = response.status();
    if status.is_success() {
        let body: WireResponse = response
            .json()
            .await
            .map_err(|e| RegistryError::store_unavailable(e.to_string()))?;
        body.node
            .ok_or_else(|| RegistryError::store_unavailable("response missing node"))
    } else {
        match response.json::<WireError>().await {
            Ok(err) => Err(map_error_code(path, err)),
            Err(_) => Err(RegistryError::store_unavailable(format!(
                "unexpected status {} for {}",
                status, path
            ))),
        }
    }
}

/// Render the form body of a conditional write
fn set_form(value: &str, opts: &SetOptions) -> Vec<(&'static str, String)> {
    let mut form = Vec::new();
    // A refresh must not carry a value; etcd rejects the combination.
    if !opts.refresh {
        form.push(("value", value.to_string()));
    }
    if let Some(ttl_ms) = opts.ttl_ms {
        form.push(("ttl", ttl_seconds(ttl_ms).to_string()));
    }
    if opts.refresh {
        form.push(("refresh", "true".to_string()));
    }
    if let Some(prev_exist) = opts.prev_exist {
        form.push(("prevExist", prev_exist.to_string()));
    }
    if let Some(ref prev_value) = opts.prev_value {
        form.push(("prevValue", prev_value.clone()));
    }
    if let Some(prev_index) = opts.prev_index {
        form.push(("prevIndex", prev_index.to_string()));
    }
    form
}

#[async_trait]
impl RegistryStore for EtcdStore {
    async fn get(&self, path: &str, recursive: bool) -> RegistryResult<StoreNode> {
        let response = self
            .try_endpoints(|http, endpoint| {
                let mut request = http.get(key_url(endpoint, path));
                if recursive {
                    request = request.query(&[("recursive", "true")]);
                }
                request
            })
            .await?;

        let node = parse_node(path, response).await?;
        Ok(node.into_store_node())
    }

    async fn set(&self, path: &str, value: &str, opts: SetOptions) -> RegistryResult<u64> {
        let form = set_form(value, &opts);
        let response = self
            .try_endpoints(|http, endpoint| http.put(key_url(endpoint, path)).form(&form))
            .await?;

        let node = parse_node(path, response).await?;
        Ok(node.modified_index)
    }

    async fn delete(&self, path: &str, opts: DeleteOptions) -> RegistryResult<u64> {
        let response = self
            .try_endpoints(|http, endpoint| {
                let mut request = http.delete(key_url(endpoint, path));
                if let Some(prev_index) = opts.prev_index {
                    request = request.query(&[("prevIndex", prev_index.to_string())]);
                }
                request
            })
            .await?;

        let node = parse_node(path, response).await?;
        Ok(node.modified_index)
    }

    async fn watch(&self, path: &str, recursive: bool) -> RegistryResult<Box<dyn StoreWatch>> {
        Ok(Box::new(EtcdWatch {
            http: self.watch_http.clone(),
            endpoints: self.endpoints.clone(),
            path: path.to_string(),
            recursive,
            after_index: None,
        }))
    }
}

/// Long-poll watch over an etcd key prefix
///
/// Tracks the index of the last delivered event so consecutive calls
/// resume where the previous one left off instead of re-observing it.
struct EtcdWatch {
    http: reqwest::Client,
    endpoints: Vec<String>,
    path: String,
    recursive: bool,
    after_index: Option<u64>,
}

#[async_trait]
impl StoreWatch for EtcdWatch {
    async fn changed(&mut self) -> RegistryResult<()> {
        let mut query: Vec<(&str, String)> = vec![("wait", "true".to_string())];
        if self.recursive {
            query.push(("recursive", "true".to_string()));
        }
        if let Some(index) = self.after_index {
            query.push(("waitIndex", index.to_string()));
        }

        let mut last_error: Option<RegistryError> = None;
        for endpoint in &self.endpoints {
            let request = self.http.get(key_url(endpoint, &self.path)).query(&query);
            match request.send().await {
                Ok(response) => match parse_node(&self.path, response).await {
                    Ok(node) => {
                        self.after_index = Some(node.modified_index.saturating_add(1));
                        return Ok(());
                    }
                    Err(e) => last_error = Some(e),
                },
                Err(e) => last_error = Some(RegistryError::store_unavailable(e.to_string())),
            }
        }

        Err(last_error
            .unwrap_or_else(|| RegistryError::store_unavailable("no reachable endpoint")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_parses_endpoint_list() {
        let store =
            EtcdStore::connect("http://127.0.0.1:2379, http://127.0.0.1:12379/").unwrap();
        assert_eq!(
            store.endpoints,
            vec!["http://127.0.0.1:2379", "http://127.0.0.1:12379"]
        );
    }

    #[test]
    fn test_connect_rejects_empty_list() {
        assert!(EtcdStore::connect("").is_err());
        assert!(EtcdStore::connect(" , ").is_err());
    }

    #[test]
    fn test_key_url() {
        assert_eq!(
            key_url("http://127.0.0.1:2379", "beacon/service/grpc/hello/1"),
            "http://127.0.0.1:2379/v2/keys/beacon/service/grpc/hello/1"
        );
    }

    #[test]
    fn test_ttl_seconds_rounds_up() {
        assert_eq!(ttl_seconds(1_000), 1);
        assert_eq!(ttl_seconds(1_001), 2);
        assert_eq!(ttl_seconds(10_000), 10);
    }

    #[test]
    fn test_set_form_plain_write() {
        let form = set_form("payload", &SetOptions::with_ttl(10_000));
        assert!(form.contains(&("value", "payload".to_string())));
        assert!(form.contains(&("ttl", "10".to_string())));
        assert!(!form.iter().any(|(k, _)| *k == "refresh"));
    }

    #[test]
    fn test_set_form_refresh_omits_value() {
        let form = set_form("ignored", &SetOptions::refresh_lease(10_000));
        assert!(!form.iter().any(|(k, _)| *k == "value"));
        assert!(form.contains(&("refresh", "true".to_string())));
        assert!(form.contains(&("prevExist", "true".to_string())));
    }

    #[test]
    fn test_set_form_cas_params() {
        let opts = SetOptions {
            prev_value: Some("3".into()),
            prev_index: Some(42),
            ..Default::default()
        };
        let form = set_form("4", &opts);
        assert!(form.contains(&("prevValue", "3".to_string())));
        assert!(form.contains(&("prevIndex", "42".to_string())));
    }

    #[test]
    fn test_error_code_mapping() {
        let err = |code| WireError {
            error_code: code,
            message: String::new(),
        };
        assert!(matches!(
            map_error_code("p", err(ECODE_KEY_NOT_FOUND)),
            RegistryError::NotFound { .. }
        ));
        assert!(matches!(
            map_error_code("p", err(ECODE_TEST_FAILED)),
            RegistryError::CompareFailed { .. }
        ));
        assert!(matches!(
            map_error_code("p", err(ECODE_NODE_EXIST)),
            RegistryError::CompareFailed { .. }
        ));
        assert!(matches!(
            map_error_code("p", err(ECODE_DIR_NOT_EMPTY)),
            RegistryError::DirectoryNotEmpty { .. }
        ));
        assert!(matches!(
            map_error_code("p", err(999)),
            RegistryError::StoreUnavailable { .. }
        ));
    }

    #[test]
    fn test_wire_node_deserialize() {
        let raw = r#"{
            "key": "/beacon/service/grpc/hello",
            "dir": true,
            "modifiedIndex": 7,
            "nodes": [
                {"key": "/beacon/service/grpc/hello/1",
                 "value": "{\"id\":1}",
                 "modifiedIndex": 7}
            ]
        }"#;
        let node: WireNode = serde_json::from_str(raw).unwrap();
        assert!(node.dir);
        assert_eq!(node.modified_index, 7);
        assert_eq!(node.nodes.len(), 1);
        assert_eq!(node.nodes[0].value, "{\"id\":1}");
    }
}
