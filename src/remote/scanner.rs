//! Scanner
//!
//! Runs every registered enumerator that the filter keeps, concurrently, and
//! collects their resources. Permission failures become alerts and the scan
//! goes on; any other failure aborts it.

use super::parallel::ParallelRunner;
use super::RemoteLibrary;
use crate::alerter::{Alert, AlertSink, ScanningPhase};
use crate::error::{RemoteError, ScanError};
use crate::filter::Filter;
use crate::resource::Resource;
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct ScannerOptions {
    /// Replace enumerated stubs by fully attributed resources
    pub deep: bool,
    /// Worker bound, available parallelism when unset
    pub parallelism: Option<usize>,
}

pub struct Scanner {
    library: Arc<RemoteLibrary>,
    alerter: Arc<dyn AlertSink>,
    options: ScannerOptions,
    filter: Arc<dyn Filter>,
    token: CancellationToken,
}

impl Scanner {
    pub fn new(
        library: Arc<RemoteLibrary>,
        alerter: Arc<dyn AlertSink>,
        options: ScannerOptions,
        filter: Arc<dyn Filter>,
    ) -> Self {
        Self {
            library,
            alerter,
            options,
            filter,
            token: CancellationToken::new(),
        }
    }

    /// Bind the scan to an external cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    fn runner<T: Send + 'static>(&self) -> ParallelRunner<T, RemoteError> {
        match self.options.parallelism {
            Some(workers) => ParallelRunner::new(&self.token, workers),
            None => ParallelRunner::with_default_parallelism(&self.token),
        }
    }

    /// Enumerate every kept resource type.
    ///
    /// Resources come back in completion order. A later duplicate of an
    /// already collected `(type, id)` is dropped.
    pub async fn resources(&self) -> Result<Vec<Resource>, ScanError> {
        let mut resources = self.retrieve_resources().await?;
        if self.options.deep {
            resources = self.fetch_details(resources).await?;
        }
        Ok(dedup(resources))
    }

    async fn retrieve_resources(&self) -> Result<Vec<Resource>, ScanError> {
        let mut runner = self.runner::<Vec<Resource>>();

        for enumerator in self.library.enumerators() {
            let resource_type = enumerator.supported_type();
            if self.filter.is_type_ignored(&resource_type) {
                tracing::debug!("Ignored enumeration of {} from filter", resource_type);
                continue;
            }

            let enumerator = enumerator.clone();
            runner.run(async move {
                tracing::debug!("Enumerating {}", resource_type);
                let resources = enumerator.enumerate().await?;
                tracing::debug!("Enumerated {} {} resources", resources.len(), resource_type);
                Ok::<_, RemoteError>(resources)
            });
        }

        let mut results = Vec::new();
        while let Some(outcome) = runner.read().await {
            match outcome {
                Ok(resources) => results.extend(resources),
                Err(err) => self.handle_error(err, ScanningPhase::Enumeration)?,
            }
        }

        if let Some(err) = runner.err() {
            return Err(err.into());
        }
        Ok(results)
    }

    async fn fetch_details(&self, resources: Vec<Resource>) -> Result<Vec<Resource>, ScanError> {
        let mut runner = self.runner::<Option<Resource>>();
        let mut results = Vec::with_capacity(resources.len());

        for resource in resources {
            let Some(fetcher) = self.library.details_fetcher(&resource.resource_type) else {
                results.push(resource);
                continue;
            };

            runner.run(async move {
                tracing::debug!("Reading details of {} {}", resource.resource_type, resource.id);
                fetcher.read_details(&resource).await
            });
        }

        while let Some(outcome) = runner.read().await {
            match outcome {
                Ok(Some(resource)) => results.push(resource),
                Ok(None) => {}
                Err(err) => self.handle_error(err, ScanningPhase::DetailsFetching)?,
            }
        }

        if let Some(err) = runner.err() {
            return Err(err.into());
        }
        Ok(results)
    }

    fn handle_error(&self, err: RemoteError, phase: ScanningPhase) -> Result<(), ScanError> {
        if !err.is_access_denied() {
            tracing::error!("Scan failed during {}: {}", phase, err);
            return Err(err.into());
        }

        let alert = Alert::remote_access_denied(&err, phase);
        self.alerter.send_alert(err.resource_type().as_str(), alert);
        Ok(())
    }
}

fn dedup(resources: Vec<Resource>) -> Vec<Resource> {
    let mut seen = HashSet::new();
    resources
        .into_iter()
        .filter(|res| seen.insert((res.resource_type.clone(), res.id.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerter::Alerter;
    use crate::error::{RemoteApiError, RunnerError};
    use crate::filter::TypeFilter;
    use crate::remote::{DetailsFetcher, Enumerator};
    use crate::resource::ResourceType;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Outcome {
        Resources(Vec<&'static str>),
        Denied,
        Broken,
        Panic,
    }

    struct FakeEnumerator {
        ty: &'static str,
        outcome: Outcome,
        calls: AtomicUsize,
    }

    impl FakeEnumerator {
        fn new(ty: &'static str, outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                ty,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Enumerator for FakeEnumerator {
        fn supported_type(&self) -> ResourceType {
            ResourceType::new(self.ty)
        }

        async fn enumerate(&self) -> Result<Vec<Resource>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Outcome::Resources(ids) => {
                    Ok(ids.iter().map(|id| Resource::stub(self.ty, *id)).collect())
                }
                Outcome::Denied => Err(RemoteError::listing(
                    RemoteApiError::new(403, "forbidden"),
                    self.ty,
                )),
                Outcome::Broken => Err(RemoteError::listing(
                    RemoteApiError::new(500, "backend error"),
                    self.ty,
                )),
                Outcome::Panic => panic!("enumerator bug"),
            }
        }
    }

    fn scanner(
        enumerators: Vec<Arc<FakeEnumerator>>,
        filter: TypeFilter,
        alerter: Arc<Alerter>,
    ) -> Scanner {
        let mut library = RemoteLibrary::new();
        for enumerator in enumerators {
            library.add_enumerator(enumerator);
        }
        Scanner::new(
            Arc::new(library),
            alerter,
            ScannerOptions {
                deep: false,
                parallelism: Some(2),
            },
            Arc::new(filter),
        )
    }

    #[tokio::test]
    async fn test_access_denied_becomes_alert() {
        let a = FakeEnumerator::new("google_storage_bucket", Outcome::Resources(vec!["a1", "a2"]));
        let b = FakeEnumerator::new("google_compute_network", Outcome::Denied);
        let c = FakeEnumerator::new("google_compute_disk", Outcome::Resources(vec!["c1"]));
        let alerter = Arc::new(Alerter::new());

        let resources = scanner(vec![a, b, c], TypeFilter::default(), alerter.clone())
            .resources()
            .await
            .unwrap();

        assert_eq!(resources.len(), 3);
        assert!(resources.iter().all(|r| r.resource_type != "google_compute_network"));

        let alerts = alerter.alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts["google_compute_network"].len(), 1);
        assert_eq!(alerts["google_compute_network"][0].phase, ScanningPhase::Enumeration);
    }

    #[tokio::test]
    async fn test_other_errors_abort_the_scan() {
        let a = FakeEnumerator::new("google_storage_bucket", Outcome::Resources(vec!["a1"]));
        let b = FakeEnumerator::new("google_compute_network", Outcome::Broken);
        let alerter = Arc::new(Alerter::new());

        let err = scanner(vec![a, b], TypeFilter::default(), alerter.clone())
            .resources()
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            ScanError::Remote(RemoteError::Listing { resource_type, .. })
                if resource_type == "google_compute_network"
        ));
        assert!(alerter.is_empty());
    }

    #[tokio::test]
    async fn test_ignored_types_are_never_enumerated() {
        let a = FakeEnumerator::new("google_storage_bucket", Outcome::Resources(vec!["a1"]));
        let b = FakeEnumerator::new("google_compute_network", Outcome::Resources(vec!["b1"]));
        let filter = TypeFilter::new(["google_compute_*"]).unwrap();

        let resources = scanner(vec![a.clone(), b.clone()], filter, Arc::new(Alerter::new()))
            .resources()
            .await
            .unwrap();

        assert_eq!(resources.len(), 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panicking_enumerator_is_runner_error() {
        let a = FakeEnumerator::new("google_storage_bucket", Outcome::Panic);
        let err = scanner(vec![a], TypeFilter::default(), Arc::new(Alerter::new()))
            .resources()
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Runner(RunnerError::Panic(_))));
    }

    #[tokio::test]
    async fn test_duplicates_are_dropped() {
        let a = FakeEnumerator::new(
            "google_storage_bucket",
            Outcome::Resources(vec!["a1", "a1", "a2"]),
        );
        let resources = scanner(vec![a], TypeFilter::default(), Arc::new(Alerter::new()))
            .resources()
            .await
            .unwrap();
        assert_eq!(resources.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let a = FakeEnumerator::new("google_storage_bucket", Outcome::Resources(vec!["a1"]));
        let token = CancellationToken::new();
        token.cancel();

        let err = scanner(vec![a], TypeFilter::default(), Arc::new(Alerter::new()))
            .with_cancellation(token)
            .resources()
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::Runner(RunnerError::Cancelled)));
    }

    struct FakeFetcher;

    #[async_trait]
    impl DetailsFetcher for FakeFetcher {
        async fn read_details(&self, resource: &Resource) -> Result<Option<Resource>, RemoteError> {
            match resource.id.as_str() {
                "gone" => Ok(None),
                "secret" => Err(RemoteError::scanning(
                    anyhow::anyhow!("AccessDenied: cannot read"),
                    resource.resource_type.clone(),
                    resource.id.clone(),
                )),
                _ => {
                    let mut full = resource.clone();
                    full.attributes
                        .insert("location".to_string(), serde_json::json!("EU"));
                    Ok(Some(full))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_deep_mode() {
        let buckets = FakeEnumerator::new(
            "google_storage_bucket",
            Outcome::Resources(vec!["kept", "gone", "secret"]),
        );
        let disks = FakeEnumerator::new("google_compute_disk", Outcome::Resources(vec!["d1"]));

        let mut library = RemoteLibrary::new();
        library.add_enumerator(buckets);
        library.add_enumerator(disks);
        library.add_details_fetcher("google_storage_bucket", Arc::new(FakeFetcher));

        let alerter = Arc::new(Alerter::new());
        let scanner = Scanner::new(
            Arc::new(library),
            alerter.clone(),
            ScannerOptions {
                deep: true,
                parallelism: None,
            },
            Arc::new(TypeFilter::default()),
        );

        let resources = scanner.resources().await.unwrap();
        let mut ids: Vec<_> = resources.iter().map(|r| r.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["d1", "kept"]);

        let kept = resources.iter().find(|r| r.id == "kept").unwrap();
        assert_eq!(kept.get_string("location"), Some("EU"));

        let alerts = alerter.alerts();
        assert_eq!(alerts["google_storage_bucket"][0].phase, ScanningPhase::DetailsFetching);
    }
}
