//! Integration tests for the Google remote using wiremock
//!
//! Repositories, enumerators and the scanner run against mocked Compute
//! Engine and Cloud Storage endpoints.

use remotescan::gcp::auth::StaticToken;
use remotescan::gcp::GcpClient;
use remotescan::remote::google::{self, repository::ComputeRepository};
use remotescan::remote::{Cache, RemoteLibrary, Scanner, ScannerOptions};
use remotescan::{Alerter, RemoteError, ScanError, TypeFilter};
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{bearer_token, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "test-project";

fn client(server: &MockServer) -> GcpClient {
    GcpClient::with_token_source(PROJECT, Arc::new(StaticToken("test-token".to_string())))
        .expect("client should build")
        .with_base_url(&server.uri())
}

fn self_link(rest: &str) -> String {
    format!("https://www.googleapis.com/compute/v1/projects/{PROJECT}/{rest}")
}

fn instances_response() -> Value {
    json!({
        "items": {
            "zones/us-central1-a": {
                "instances": [{
                    "name": "vm-1",
                    "status": "RUNNING",
                    "zone": self_link("zones/us-central1-a"),
                    "selfLink": self_link("zones/us-central1-a/instances/vm-1"),
                    "disks": [
                        {"boot": true, "source": self_link("zones/us-central1-a/disks/vm-1")},
                        {
                            "boot": false,
                            "deviceName": "data",
                            "source": self_link("zones/us-central1-a/disks/data-1")
                        }
                    ]
                }]
            },
            "zones/us-central1-b": {
                "warning": {"code": "NO_RESULTS_ON_PAGE"}
            }
        }
    })
}

fn forbidden() -> ResponseTemplate {
    ResponseTemplate::new(403).set_body_json(json!({
        "error": {
            "code": 403,
            "message": "Required 'storage.buckets.list' permission",
            "status": "PERMISSION_DENIED"
        }
    }))
}

fn scanner(library: RemoteLibrary, alerter: Arc<Alerter>, filter: TypeFilter) -> Scanner {
    Scanner::new(
        Arc::new(library),
        alerter,
        ScannerOptions {
            deep: false,
            parallelism: Some(4),
        },
        Arc::new(filter),
    )
}

mod repository_tests {
    use super::*;

    /// Every page is fetched and accumulated
    #[tokio::test]
    async fn test_networks_follow_next_page_token() {
        let server = MockServer::start().await;
        let networks_path = format!("/compute/v1/projects/{PROJECT}/global/networks");

        Mock::given(method("GET"))
            .and(path(networks_path.as_str()))
            .and(query_param("pageToken", "page-2"))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"name": "net-3", "selfLink": self_link("global/networks/net-3")}]
            })))
            .with_priority(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(networks_path.as_str()))
            .and(bearer_token("test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"name": "net-1", "selfLink": self_link("global/networks/net-1")},
                    {"name": "net-2", "selfLink": self_link("global/networks/net-2")}
                ],
                "nextPageToken": "page-2"
            })))
            .with_priority(2)
            .expect(1)
            .mount(&server)
            .await;

        let repository = ComputeRepository::new(client(&server), Arc::new(Cache::new()));
        let networks = repository.list_all_networks().await.expect("listing should succeed");

        let names: Vec<_> = networks.iter().map(|n| n["name"].as_str().unwrap()).collect();
        assert_eq!(names, vec!["net-1", "net-2", "net-3"]);
    }

    /// Concurrent callers of the same listing share one upstream call
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_listing_is_single_flight() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/aggregated/instances")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(instances_response())
                    .set_delay(std::time::Duration::from_millis(50)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let repository = Arc::new(ComputeRepository::new(client(&server), Arc::new(Cache::new())));
        let calls: Vec<_> = (0..10)
            .map(|_| {
                let repository = repository.clone();
                tokio::spawn(async move { repository.list_all_instances().await.unwrap() })
            })
            .collect();

        for call in calls {
            let instances = call.await.unwrap();
            assert_eq!(instances.len(), 1);
        }
    }

    /// API failures keep their HTTP status
    #[tokio::test]
    async fn test_error_status_is_preserved() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/global/firewalls")))
            .respond_with(forbidden())
            .mount(&server)
            .await;

        let repository = ComputeRepository::new(client(&server), Arc::new(Cache::new()));
        let err = repository.list_all_firewalls().await.unwrap_err();

        let api = err
            .downcast_ref::<remotescan::RemoteApiError>()
            .expect("should be an API error");
        assert_eq!(api.status, 403);
        assert_eq!(api.message, "Required 'storage.buckets.list' permission");
    }
}

mod scanner_tests {
    use super::*;

    /// Instances and their attached disks come from one cached listing
    #[tokio::test]
    async fn test_instances_and_attached_disks() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/aggregated/instances")))
            .respond_with(ResponseTemplate::new(200).set_body_json(instances_response()))
            .expect(1)
            .mount(&server)
            .await;

        let mut library = RemoteLibrary::new();
        google::init(&mut library, client(&server), Arc::new(Cache::new()), None);
        let filter =
            TypeFilter::new(["*", "!google_compute_instance", "!google_compute_attached_disk"])
                .unwrap();

        let resources = scanner(library, Arc::new(Alerter::new()), filter)
            .resources()
            .await
            .expect("scan should succeed");

        assert_eq!(resources.len(), 2);

        let instance = resources
            .iter()
            .find(|r| r.resource_type == "google_compute_instance")
            .unwrap();
        assert_eq!(instance.id, format!("projects/{PROJECT}/zones/us-central1-a/instances/vm-1"));
        assert_eq!(instance.get_string("zone"), Some("us-central1-a"));

        let disk = resources
            .iter()
            .find(|r| r.resource_type == "google_compute_attached_disk")
            .unwrap();
        assert_eq!(
            disk.id,
            format!("projects/{PROJECT}/zones/us-central1-a/instances/vm-1/data-1")
        );
        assert_eq!(disk.get_string("device_name"), Some("data"));
    }

    /// A forbidden listing is an alert, the rest of the scan completes
    #[tokio::test]
    async fn test_forbidden_listing_becomes_alert() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/storage/v1/b"))
            .and(query_param("project", PROJECT))
            .respond_with(forbidden())
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/global/networks")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"name": "default", "selfLink": self_link("global/networks/default")},
                    {"name": "vpc", "selfLink": self_link("global/networks/vpc")}
                ]
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/global/firewalls")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [
                    {"name": "allow-ssh", "selfLink": self_link("global/firewalls/allow-ssh")}
                ]
            })))
            .mount(&server)
            .await;

        let mut library = RemoteLibrary::new();
        google::init(&mut library, client(&server), Arc::new(Cache::new()), None);
        let filter = TypeFilter::new([
            "*",
            "!google_storage_bucket",
            "!google_compute_network",
            "!google_compute_firewall",
        ])
        .unwrap();
        let alerter = Arc::new(Alerter::new());

        let resources = scanner(library, alerter.clone(), filter)
            .resources()
            .await
            .expect("scan should succeed");

        assert_eq!(resources.len(), 3);
        assert!(resources.iter().all(|r| r.resource_type != "google_storage_bucket"));

        let alerts = alerter.alerts();
        assert_eq!(alerts.len(), 1);
        let alert = &alerts["google_storage_bucket"][0];
        assert_eq!(
            alert.message,
            "Ignoring google_storage_bucket from drift calculation: \
             Listing google_storage_bucket is forbidden: \
             API request failed: 403 Required 'storage.buckets.list' permission"
        );
    }

    /// A failing prerequisite listing names the type that was listed
    #[tokio::test]
    async fn test_attached_disks_alert_names_instances() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/aggregated/instances")))
            .respond_with(forbidden())
            .mount(&server)
            .await;

        let mut library = RemoteLibrary::new();
        google::init(&mut library, client(&server), Arc::new(Cache::new()), None);
        let filter = TypeFilter::new(["*", "!google_compute_attached_disk"]).unwrap();
        let alerter = Arc::new(Alerter::new());

        let resources = scanner(library, alerter.clone(), filter).resources().await.unwrap();
        assert!(resources.is_empty());

        let alerts = alerter.alerts();
        assert!(alerts["google_compute_attached_disk"][0]
            .message
            .contains("Listing google_compute_instance is forbidden"));
    }

    /// Server errors abort the scan
    #[tokio::test]
    async fn test_server_error_aborts_scan() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/compute/v1/projects/{PROJECT}/aggregated/disks")))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend error"))
            .mount(&server)
            .await;

        let mut library = RemoteLibrary::new();
        google::init(&mut library, client(&server), Arc::new(Cache::new()), None);
        let filter = TypeFilter::new(["*", "!google_compute_disk"]).unwrap();
        let alerter = Arc::new(Alerter::new());

        let err = scanner(library, alerter.clone(), filter)
            .resources()
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ScanError::Remote(RemoteError::Listing { ref resource_type, .. })
                if resource_type == "google_compute_disk"
        ));
        assert!(alerter.is_empty());
    }
}
