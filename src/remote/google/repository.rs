//! Google Cloud repositories
//!
//! Every listing is wrapped in one single-flight cache lookup and follows
//! `nextPageToken` until the last page. Aggregated Compute Engine listings
//! are flattened across zones and regions.

use crate::gcp::http::add_query_params;
use crate::gcp::GcpClient;
use crate::remote::Cache;
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;

/// Items of an aggregated response:
/// `{"items": {"zones/us-central1-a": {"instances": [...]}, "zones/x": {"warning": {...}}}}`
fn flatten_aggregated_items(response: &Value) -> Vec<Value> {
    let Some(scopes) = response.get("items").and_then(|v| v.as_object()) else {
        return Vec::new();
    };

    let mut items = Vec::new();
    for scoped in scopes.values() {
        let Some(obj) = scoped.as_object() else {
            continue;
        };
        for (key, value) in obj {
            if key == "warning" {
                continue;
            }
            if let Some(arr) = value.as_array() {
                items.extend(arr.iter().cloned());
            }
        }
    }
    items
}

fn list_items(response: &Value) -> Vec<Value> {
    response
        .get("items")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Fetch every page of a listing
async fn list_pages(
    client: &GcpClient,
    url: &str,
    params: &[(&str, &str)],
    aggregated: bool,
) -> Result<Vec<Value>> {
    let mut all_items = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut query = params.to_vec();
        if let Some(token) = page_token.as_deref() {
            query.push(("pageToken", token));
        }

        let response = client.get(&add_query_params(url, &query)).await?;
        if aggregated {
            all_items.extend(flatten_aggregated_items(&response));
        } else {
            all_items.extend(list_items(&response));
        }

        match response
            .get("nextPageToken")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
        {
            Some(token) => page_token = Some(token.to_string()),
            None => break,
        }
    }

    tracing::debug!("Listed {} items from {}", all_items.len(), url);
    Ok(all_items)
}

pub struct StorageRepository {
    client: GcpClient,
    cache: Arc<Cache>,
}

impl StorageRepository {
    pub fn new(client: GcpClient, cache: Arc<Cache>) -> Self {
        Self { client, cache }
    }

    pub async fn list_all_buckets(&self) -> Result<Arc<Vec<Value>>> {
        let key = format!("storageListAllBuckets_{}", self.client.project_id);
        let url = self.client.storage_url("b");
        self.cache
            .get_or_fetch(&key, || async {
                let params = [("project", self.client.project_id.as_str())];
                list_pages(&self.client, &url, &params, false).await
            })
            .await
    }
}

pub struct ComputeRepository {
    client: GcpClient,
    cache: Arc<Cache>,
}

impl ComputeRepository {
    pub fn new(client: GcpClient, cache: Arc<Cache>) -> Self {
        Self { client, cache }
    }

    async fn list_global(&self, resource: &str) -> Result<Arc<Vec<Value>>> {
        let key = format!("computeListAll_{}_{}", resource, self.client.project_id);
        let url = self.client.compute_global_url(resource);
        self.cache
            .get_or_fetch(&key, || list_pages(&self.client, &url, &[], false))
            .await
    }

    async fn list_aggregated(&self, resource: &str) -> Result<Arc<Vec<Value>>> {
        let key = format!("computeListAllAggregated_{}_{}", resource, self.client.project_id);
        let url = self.client.compute_aggregated_url(resource);
        self.cache
            .get_or_fetch(&key, || list_pages(&self.client, &url, &[], true))
            .await
    }

    pub async fn list_all_instances(&self) -> Result<Arc<Vec<Value>>> {
        self.list_aggregated("instances").await
    }

    pub async fn list_all_disks(&self) -> Result<Arc<Vec<Value>>> {
        self.list_aggregated("disks").await
    }

    pub async fn list_all_subnetworks(&self) -> Result<Arc<Vec<Value>>> {
        self.list_aggregated("subnetworks").await
    }

    pub async fn list_all_networks(&self) -> Result<Arc<Vec<Value>>> {
        self.list_global("networks").await
    }

    pub async fn list_all_firewalls(&self) -> Result<Arc<Vec<Value>>> {
        self.list_global("firewalls").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_aggregated_items() {
        let response = json!({
            "items": {
                "zones/us-central1-a": {"instances": [{"name": "a"}, {"name": "b"}]},
                "zones/us-central1-b": {"warning": {"code": "NO_RESULTS_ON_PAGE"}},
                "zones/europe-west1-b": {"instances": [{"name": "c"}]}
            }
        });
        let names: Vec<_> = flatten_aggregated_items(&response)
            .iter()
            .map(|i| i["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(flatten_aggregated_items(&json!({})).is_empty());
    }

    #[test]
    fn test_list_items_without_items() {
        assert!(list_items(&json!({"kind": "compute#networkList"})).is_empty());
    }
}
