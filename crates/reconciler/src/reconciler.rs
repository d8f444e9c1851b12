//! One reconcile pass: fetch, branch, diff, apply.

use std::sync::Arc;

use appservice_core::{AppService, AppSpec, ObjectStore, Service};
use tracing::{debug, info};

use crate::builder;
use crate::error::Result;
use crate::history;
use crate::retry::ConflictRetryer;

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The desired-state object no longer exists; nothing to do.
    Missing,
    /// The object is being torn down; cascade delete owns the children.
    Deleting,
    /// First creation: snapshot recorded, both children created.
    Created,
    /// Children match the last-applied spec; nothing was written.
    Unchanged,
    /// A half-finished creation was completed (the missing service created).
    Repaired,
    /// Drift detected: children rewritten, snapshot refreshed.
    Updated,
}

/// Drives one reconcile pass for an AppService identity.
///
/// Stateless between passes: the only memory is the snapshot annotation on
/// the object itself, so passes may be repeated or re-ordered freely by the
/// invoking scheduler. Mutual exclusion across passes is the scheduler's
/// concern, not ours; concurrent writers are handled by the conflict
/// retryer instead.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    retryer: ConflictRetryer,
}

impl Reconciler {
    /// Create a reconciler with the default retry policy.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_retryer(store, ConflictRetryer::default())
    }

    /// Create a reconciler with an explicit retry policy.
    pub fn with_retryer(store: Arc<dyn ObjectStore>, retryer: ConflictRetryer) -> Self {
        Self { store, retryer }
    }

    /// Run one pass for the object identified by (namespace, name).
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome> {
        let app = match self.store.get_app(namespace, name).await {
            Ok(app) => app,
            Err(err) if err.is_not_found() => {
                // An absent object is not a failure.
                debug!(namespace, name, "object is gone, nothing to reconcile");
                return Ok(ReconcileOutcome::Missing);
            }
            Err(err) => return Err(err.into()),
        };

        if app.metadata.deletion_timestamp.is_some() {
            debug!(namespace, name, "object is being deleted, children cascade");
            return Ok(ReconcileOutcome::Deleting);
        }

        match self.store.get_deployment(namespace, name).await {
            Err(err) if err.is_not_found() => self.create_children(&app).await,
            Err(err) => Err(err.into()),
            Ok(_) => self.converge(&app).await,
        }
    }

    /// First creation: record the snapshot, then create both children.
    ///
    /// Snapshot first: if a child create fails, the next pass lands in this
    /// branch again (it keys off the deployment probe, never the snapshot)
    /// and completes the remainder. Repair, not rollback.
    async fn create_children(&self, app: &AppService) -> Result<ReconcileOutcome> {
        self.record_applied_spec(app).await?;
        self.store
            .create_deployment(builder::deployment_for(app))
            .await?;
        self.store.create_service(builder::service_for(app)).await?;

        info!(
            namespace = %app.metadata.namespace,
            name = %app.metadata.name,
            image = %app.spec.image,
            replicas = app.spec.replicas,
            "created deployment and service"
        );
        Ok(ReconcileOutcome::Created)
    }

    /// Steady state: diff the last-applied snapshot against the current spec.
    async fn converge(&self, app: &AppService) -> Result<ReconcileOutcome> {
        let namespace = app.metadata.namespace.as_str();
        let name = app.metadata.name.as_str();

        // Children exist, so a valid snapshot must too. An absent or
        // unreadable one is surfaced, never rebuilt from the current spec:
        // the prior intent cannot be guessed.
        let last_applied = history::last_applied(app)?;

        let service = match self.store.get_service(namespace, name).await {
            Ok(service) => Some(service),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(err.into()),
        };

        if last_applied == app.spec {
            return match service {
                Some(_) => {
                    debug!(namespace, name, "spec unchanged, nothing to write");
                    Ok(ReconcileOutcome::Unchanged)
                }
                None => {
                    // An earlier pass created the deployment and died before
                    // the service. Finish the job.
                    self.store.create_service(builder::service_for(app)).await?;
                    info!(namespace, name, "created service missing from an earlier pass");
                    Ok(ReconcileOutcome::Repaired)
                }
            };
        }

        self.apply_update(app, &last_applied, service).await
    }

    /// Rewrite drifted children, then refresh the snapshot.
    ///
    /// Children first, snapshot last: a failed child write leaves the stale
    /// snapshot in place, so the next pass still sees the drift.
    async fn apply_update(
        &self,
        app: &AppService,
        last_applied: &AppSpec,
        service: Option<Service>,
    ) -> Result<ReconcileOutcome> {
        let namespace = app.metadata.namespace.as_str();
        let name = app.metadata.name.as_str();

        {
            let store = Arc::clone(&self.store);
            let namespace = app.metadata.namespace.clone();
            let name = app.metadata.name.clone();
            let target = builder::deployment_spec_for(app);
            self.retryer
                .apply(move || {
                    let store = Arc::clone(&store);
                    let namespace = namespace.clone();
                    let name = name.clone();
                    let target = target.clone();
                    async move {
                        let mut deployment = store.get_deployment(&namespace, &name).await?;
                        deployment.spec = target;
                        store.update_deployment(deployment).await?;
                        Ok(())
                    }
                })
                .await?;
        }

        match service {
            None => {
                // Drifted and half-created at once: the fresh service is
                // built straight from the current spec, nothing to preserve.
                self.store.create_service(builder::service_for(app)).await?;
            }
            Some(_) if builder::service_spec_changed(last_applied, &app.spec) => {
                let store = Arc::clone(&self.store);
                let namespace = app.metadata.namespace.clone();
                let name = app.metadata.name.clone();
                let target = builder::service_spec_for(app);
                self.retryer
                    .apply(move || {
                        let store = Arc::clone(&store);
                        let namespace = namespace.clone();
                        let name = name.clone();
                        let target = target.clone();
                        async move {
                            let mut service = store.get_service(&namespace, &name).await?;
                            let mut spec = target;
                            // The virtual address was assigned by the
                            // platform and must not be reallocated.
                            spec.cluster_ip = service.spec.cluster_ip.clone();
                            service.spec = spec;
                            store.update_service(service).await?;
                            Ok(())
                        }
                    })
                    .await?;
            }
            Some(_) => {
                debug!(namespace, name, "service-affecting fields unchanged");
            }
        }

        self.record_applied_spec(app).await?;

        info!(namespace, name, "updated children to match edited spec");
        Ok(ReconcileOutcome::Updated)
    }

    /// Write the canonical encoding of the current spec into the snapshot
    /// annotation, conflict-safely.
    async fn record_applied_spec(&self, app: &AppService) -> Result<()> {
        let snapshot = history::encode(&app.spec)?;
        let store = Arc::clone(&self.store);
        let namespace = app.metadata.namespace.clone();
        let name = app.metadata.name.clone();
        self.retryer
            .apply(move || {
                let store = Arc::clone(&store);
                let namespace = namespace.clone();
                let name = name.clone();
                let snapshot = snapshot.clone();
                async move {
                    let mut current = store.get_app(&namespace, &name).await?;
                    let recorded = current
                        .metadata
                        .annotations
                        .get(history::LAST_APPLIED_ANNOTATION);
                    if recorded == Some(&snapshot) {
                        // A repeated creation attempt; nothing to rewrite.
                        return Ok(());
                    }
                    current
                        .metadata
                        .annotations
                        .insert(history::LAST_APPLIED_ANNOTATION.to_string(), snapshot);
                    store.update_app(current).await?;
                    Ok(())
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use appservice_core::{
        AppSpec, InMemoryObjectStore, Kind, ObjectMeta, OwnerReference, Verb,
    };
    use chrono::Utc;

    use super::*;
    use crate::error::Error;

    fn app(image: &str, replicas: i32, port: u16) -> AppService {
        AppService {
            metadata: ObjectMeta::named("default", "web"),
            spec: AppSpec {
                image: image.to_string(),
                replicas,
                port,
            },
        }
    }

    fn setup() -> (Reconciler, Arc<InMemoryObjectStore>) {
        let store = InMemoryObjectStore::new_arc();
        let reconciler = Reconciler::new(store.clone());
        (reconciler, store)
    }

    async fn edit_spec(store: &InMemoryObjectStore, mutate: impl FnOnce(&mut AppSpec)) {
        if let Ok(mut app) = store.get_app("default", "web").await {
            mutate(&mut app.spec);
            assert!(store.update_app(app).await.is_ok());
        }
        store.clear_writes().await;
    }

    #[tokio::test]
    async fn test_creation_creates_both_children_and_the_snapshot() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;

        let outcome = reconciler.reconcile("default", "web").await;
        assert_eq!(outcome, Ok(ReconcileOutcome::Created));

        let deployment = store.get_deployment("default", "web").await.ok();
        assert_eq!(
            deployment.as_ref().map(|d| d.spec.replicas),
            Some(2)
        );
        assert_eq!(
            deployment.map(|d| d.metadata.owner_references),
            Some(vec![OwnerReference {
                kind: Kind::AppService,
                name: "web".to_string(),
            }])
        );

        let service = store.get_service("default", "web").await.ok();
        assert_eq!(service.as_ref().map(|s| s.spec.port), Some(80));
        assert!(service.and_then(|s| s.spec.cluster_ip).is_some());

        let recorded = store.get_app("default", "web").await.ok().and_then(|a| {
            a.metadata
                .annotations
                .get(history::LAST_APPLIED_ANNOTATION)
                .cloned()
        });
        assert_eq!(
            recorded,
            history::encode(&AppSpec {
                image: "nginx:1.21".to_string(),
                replicas: 2,
                port: 80,
            })
            .ok()
        );

        assert_eq!(store.write_count(Verb::Create, Kind::Deployment).await, 1);
        assert_eq!(store.write_count(Verb::Create, Kind::Service).await, 1);
        assert_eq!(store.write_count(Verb::Update, Kind::AppService).await, 1);
    }

    #[tokio::test]
    async fn test_second_pass_issues_zero_writes() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Created)
        );

        store.clear_writes().await;
        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Unchanged)
        );
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_replica_edit_updates_only_the_deployment() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        assert!(reconciler.reconcile("default", "web").await.is_ok());

        edit_spec(&store, |spec| spec.replicas = 4).await;

        let outcome = reconciler.reconcile("default", "web").await;
        assert_eq!(outcome, Ok(ReconcileOutcome::Updated));

        assert_eq!(store.write_count(Verb::Update, Kind::Deployment).await, 1);
        assert_eq!(store.write_count(Verb::Update, Kind::Service).await, 0);
        assert_eq!(store.write_count(Verb::Create, Kind::Deployment).await, 0);

        let deployment = store.get_deployment("default", "web").await.ok();
        assert_eq!(deployment.map(|d| d.spec.replicas), Some(4));

        // The snapshot was refreshed, so the next pass converges.
        store.clear_writes().await;
        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Unchanged)
        );
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_port_edit_preserves_the_allocated_address() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        assert!(reconciler.reconcile("default", "web").await.is_ok());

        // Pretend the platform handed out a specific address.
        if let Ok(mut service) = store.get_service("default", "web").await {
            service.spec.cluster_ip = Some("10.0.0.7".to_string());
            store.seed_service(service).await;
        }

        edit_spec(&store, |spec| spec.port = 8080).await;

        let outcome = reconciler.reconcile("default", "web").await;
        assert_eq!(outcome, Ok(ReconcileOutcome::Updated));
        assert_eq!(store.write_count(Verb::Update, Kind::Service).await, 1);

        let service = store.get_service("default", "web").await.ok();
        assert_eq!(service.as_ref().map(|s| s.spec.port), Some(8080));
        assert_eq!(
            service.and_then(|s| s.spec.cluster_ip),
            Some("10.0.0.7".to_string())
        );
    }

    #[tokio::test]
    async fn test_deletion_is_a_no_op() {
        let (reconciler, store) = setup();
        let mut app = app("nginx:1.21", 2, 80);
        app.metadata.deletion_timestamp = Some(Utc::now());
        store.seed_app(app).await;

        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Deleting)
        );
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_absent_object_is_a_no_op() {
        let (reconciler, store) = setup();
        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Missing)
        );
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_snapshot_with_children_is_fatal() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        assert!(reconciler.reconcile("default", "web").await.is_ok());

        if let Ok(mut app) = store.get_app("default", "web").await {
            app.metadata
                .annotations
                .remove(history::LAST_APPLIED_ANNOTATION);
            store.seed_app(app).await;
        }
        store.clear_writes().await;

        let result = reconciler.reconcile("default", "web").await;
        assert!(matches!(result, Err(Error::MalformedSnapshot { .. })));
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_snapshot_is_fatal() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        assert!(reconciler.reconcile("default", "web").await.is_ok());

        if let Ok(mut app) = store.get_app("default", "web").await {
            app.metadata.annotations.insert(
                history::LAST_APPLIED_ANNOTATION.to_string(),
                "{not json".to_string(),
            );
            store.seed_app(app).await;
        }
        store.clear_writes().await;

        let result = reconciler.reconcile("default", "web").await;
        assert!(matches!(result, Err(Error::MalformedSnapshot { .. })));
        assert!(store.writes().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_service_is_created_by_a_later_pass() {
        let (reconciler, store) = setup();

        // A creation pass that died after the deployment: snapshot and
        // deployment exist, service does not.
        let mut app = app("nginx:1.21", 2, 80);
        app.metadata.annotations.insert(
            history::LAST_APPLIED_ANNOTATION.to_string(),
            history::encode(&app.spec).unwrap_or_default(),
        );
        assert!(store
            .create_deployment(builder::deployment_for(&app))
            .await
            .is_ok());
        store.seed_app(app).await;
        store.clear_writes().await;

        let outcome = reconciler.reconcile("default", "web").await;
        assert_eq!(outcome, Ok(ReconcileOutcome::Repaired));
        assert!(store.get_service("default", "web").await.is_ok());
        assert_eq!(store.write_count(Verb::Create, Kind::Service).await, 1);
        assert_eq!(store.write_count(Verb::Update, Kind::Deployment).await, 0);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_until_the_write_lands() {
        let (reconciler, store) = setup();
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        store.inject_conflicts(Kind::AppService, 2).await;

        assert_eq!(
            reconciler.reconcile("default", "web").await,
            Ok(ReconcileOutcome::Created)
        );

        let recorded = store.get_app("default", "web").await.ok().and_then(|a| {
            a.metadata
                .annotations
                .get(history::LAST_APPLIED_ANNOTATION)
                .cloned()
        });
        assert!(recorded.is_some());
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_the_conflict() {
        let store = InMemoryObjectStore::new_arc();
        let reconciler = Reconciler::with_retryer(
            store.clone(),
            ConflictRetryer::new(2, Duration::ZERO),
        );
        store.seed_app(app("nginx:1.21", 2, 80)).await;
        store.inject_conflicts(Kind::AppService, 5).await;

        let result = reconciler.reconcile("default", "web").await;
        assert!(matches!(result, Err(ref err) if err.is_conflict()));
        // Nothing else was written after the annotation write failed.
        assert_eq!(store.write_count(Verb::Create, Kind::Deployment).await, 0);
        assert_eq!(store.write_count(Verb::Create, Kind::Service).await, 0);
    }
}
