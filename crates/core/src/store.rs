//! Object store trait and implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::types::{AppService, Deployment, Kind, Object, Service};

/// Trait for the object store backing reconciliation.
///
/// Keyed by (kind, namespace, name). Reads return `NotFound` on absence,
/// creates fail with `AlreadyExists`, and updates fail with `Conflict` when
/// the submitted `resource_version` is stale. The reconciler never creates
/// or deletes `AppService` objects and never deletes children, so neither
/// operation appears here.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<AppService>;

    async fn update_app(&self, app: AppService) -> Result<AppService>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment>;

    async fn update_deployment(&self, deployment: Deployment) -> Result<Deployment>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service>;

    async fn create_service(&self, service: Service) -> Result<Service>;

    async fn update_service(&self, service: Service) -> Result<Service>;
}

/// A write verb, recorded in the in-memory store's log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
}

type ObjectKey = (String, String);

fn object_key(namespace: &str, name: &str) -> ObjectKey {
    (namespace.to_string(), name.to_string())
}

fn get_from<T>(objects: &HashMap<ObjectKey, T>, namespace: &str, name: &str) -> Result<T>
where
    T: Object + Clone,
{
    objects
        .get(&object_key(namespace, name))
        .cloned()
        .ok_or_else(|| Error::not_found(T::KIND, namespace, name))
}

fn create_in<T>(objects: &mut HashMap<ObjectKey, T>, mut object: T) -> Result<T>
where
    T: Object + Clone,
{
    let meta = object.metadata();
    let key = object_key(&meta.namespace, &meta.name);
    if objects.contains_key(&key) {
        return Err(Error::already_exists(T::KIND, &key.0, &key.1));
    }
    object.metadata_mut().resource_version = 1;
    objects.insert(key, object.clone());
    Ok(object)
}

fn update_in<T>(objects: &mut HashMap<ObjectKey, T>, mut object: T) -> Result<T>
where
    T: Object + Clone,
{
    let meta = object.metadata();
    let key = object_key(&meta.namespace, &meta.name);
    let stored = objects
        .get(&key)
        .ok_or_else(|| Error::not_found(T::KIND, &key.0, &key.1))?;
    if object.metadata().resource_version != stored.metadata().resource_version {
        return Err(Error::conflict(T::KIND, &key.0, &key.1));
    }
    object.metadata_mut().resource_version += 1;
    objects.insert(key, object.clone());
    Ok(object)
}

/// In-memory object store with optimistic concurrency, for tests.
///
/// Models the platform behaviors the reconciler depends on: every write
/// advances `resource_version` and stale writes conflict, and services get
/// a virtual address allocated at creation when none is set. Every write
/// call is recorded (attempted, not just applied) so tests can assert that
/// a pass issued zero writes.
#[derive(Default)]
pub struct InMemoryObjectStore {
    apps: RwLock<HashMap<ObjectKey, AppService>>,
    deployments: RwLock<HashMap<ObjectKey, Deployment>>,
    services: RwLock<HashMap<ObjectKey, Service>>,
    write_log: RwLock<Vec<(Verb, Kind)>>,
    injected_conflicts: RwLock<HashMap<Kind, u32>>,
    next_ip: AtomicU32,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new in-memory store wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or replace an app without recording a write. Test setup only.
    pub async fn seed_app(&self, mut app: AppService) {
        if app.metadata.resource_version == 0 {
            app.metadata.resource_version = 1;
        }
        let key = object_key(&app.metadata.namespace, &app.metadata.name);
        self.apps.write().await.insert(key, app);
    }

    /// Insert or replace a service without recording a write. Test setup only.
    pub async fn seed_service(&self, mut service: Service) {
        if service.metadata.resource_version == 0 {
            service.metadata.resource_version = 1;
        }
        let key = object_key(&service.metadata.namespace, &service.metadata.name);
        self.services.write().await.insert(key, service);
    }

    /// Make the next `count` updates of `kind` fail with a conflict.
    pub async fn inject_conflicts(&self, kind: Kind, count: u32) {
        self.injected_conflicts.write().await.insert(kind, count);
    }

    /// All write calls issued so far, in order.
    pub async fn writes(&self) -> Vec<(Verb, Kind)> {
        self.write_log.read().await.clone()
    }

    /// Number of write calls matching (verb, kind).
    pub async fn write_count(&self, verb: Verb, kind: Kind) -> usize {
        self.write_log
            .read()
            .await
            .iter()
            .filter(|entry| **entry == (verb, kind))
            .count()
    }

    /// Forget recorded writes.
    pub async fn clear_writes(&self) {
        self.write_log.write().await.clear();
    }

    async fn record(&self, verb: Verb, kind: Kind) {
        self.write_log.write().await.push((verb, kind));
    }

    async fn take_injected_conflict(&self, kind: Kind) -> bool {
        let mut conflicts = self.injected_conflicts.write().await;
        match conflicts.get_mut(&kind) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn allocate_ip(&self) -> String {
        let n = self.next_ip.fetch_add(1, Ordering::Relaxed) + 1;
        format!("10.0.0.{n}")
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<AppService> {
        get_from(&*self.apps.read().await, namespace, name)
    }

    async fn update_app(&self, app: AppService) -> Result<AppService> {
        self.record(Verb::Update, Kind::AppService).await;
        if self.take_injected_conflict(Kind::AppService).await {
            return Err(Error::conflict(
                Kind::AppService,
                &app.metadata.namespace,
                &app.metadata.name,
            ));
        }
        update_in(&mut *self.apps.write().await, app)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        get_from(&*self.deployments.read().await, namespace, name)
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.record(Verb::Create, Kind::Deployment).await;
        create_in(&mut *self.deployments.write().await, deployment)
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        self.record(Verb::Update, Kind::Deployment).await;
        if self.take_injected_conflict(Kind::Deployment).await {
            return Err(Error::conflict(
                Kind::Deployment,
                &deployment.metadata.namespace,
                &deployment.metadata.name,
            ));
        }
        update_in(&mut *self.deployments.write().await, deployment)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        get_from(&*self.services.read().await, namespace, name)
    }

    async fn create_service(&self, mut service: Service) -> Result<Service> {
        self.record(Verb::Create, Kind::Service).await;
        if service.spec.cluster_ip.is_none() {
            service.spec.cluster_ip = Some(self.allocate_ip());
        }
        create_in(&mut *self.services.write().await, service)
    }

    async fn update_service(&self, service: Service) -> Result<Service> {
        self.record(Verb::Update, Kind::Service).await;
        if self.take_injected_conflict(Kind::Service).await {
            return Err(Error::conflict(
                Kind::Service,
                &service.metadata.namespace,
                &service.metadata.name,
            ));
        }
        update_in(&mut *self.services.write().await, service)
    }
}

/// A wrapper that adds tracing to an object store.
pub struct TracingObjectStore<S: ObjectStore> {
    inner: S,
}

impl<S: ObjectStore> TracingObjectStore<S> {
    /// Create a new tracing object store.
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: ObjectStore> ObjectStore for TracingObjectStore<S> {
    async fn get_app(&self, namespace: &str, name: &str) -> Result<AppService> {
        tracing::debug!(namespace, name, "Getting appservice");
        self.inner.get_app(namespace, name).await
    }

    async fn update_app(&self, app: AppService) -> Result<AppService> {
        tracing::debug!(
            namespace = %app.metadata.namespace,
            name = %app.metadata.name,
            resource_version = app.metadata.resource_version,
            "Updating appservice"
        );
        self.inner.update_app(app).await
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        tracing::debug!(namespace, name, "Getting deployment");
        self.inner.get_deployment(namespace, name).await
    }

    async fn create_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        tracing::debug!(
            namespace = %deployment.metadata.namespace,
            name = %deployment.metadata.name,
            "Creating deployment"
        );
        self.inner.create_deployment(deployment).await
    }

    async fn update_deployment(&self, deployment: Deployment) -> Result<Deployment> {
        tracing::debug!(
            namespace = %deployment.metadata.namespace,
            name = %deployment.metadata.name,
            resource_version = deployment.metadata.resource_version,
            "Updating deployment"
        );
        self.inner.update_deployment(deployment).await
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service> {
        tracing::debug!(namespace, name, "Getting service");
        self.inner.get_service(namespace, name).await
    }

    async fn create_service(&self, service: Service) -> Result<Service> {
        tracing::debug!(
            namespace = %service.metadata.namespace,
            name = %service.metadata.name,
            "Creating service"
        );
        self.inner.create_service(service).await
    }

    async fn update_service(&self, service: Service) -> Result<Service> {
        tracing::debug!(
            namespace = %service.metadata.namespace,
            name = %service.metadata.name,
            resource_version = service.metadata.resource_version,
            "Updating service"
        );
        self.inner.update_service(service).await
    }
}
