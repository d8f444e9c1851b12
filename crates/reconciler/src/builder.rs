//! Pure mapping from an AppService spec to its two child specs.
//!
//! Deterministic by construction: identical specs always map to identical
//! child specs, field for field, so the same functions serve both first
//! creation and drift-target computation during updates.

use std::collections::BTreeMap;

use appservice_core::{
    AppService, AppSpec, ContainerSpec, Deployment, DeploymentSpec, Kind, ObjectMeta,
    OwnerReference, PodTemplate, Service, ServiceSpec,
};

/// Labels linking the deployment's pods to the service.
///
/// Derived from the object's identity only, never from mutable spec fields,
/// so selector consistency survives every spec change.
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), name.to_string());
    labels
}

fn child_meta(app: &AppService) -> ObjectMeta {
    ObjectMeta {
        namespace: app.metadata.namespace.clone(),
        name: app.metadata.name.clone(),
        labels: selector_labels(&app.metadata.name),
        owner_references: vec![OwnerReference {
            kind: Kind::AppService,
            name: app.metadata.name.clone(),
        }],
        ..ObjectMeta::default()
    }
}

/// The deployment spec an AppService asks for.
pub fn deployment_spec_for(app: &AppService) -> DeploymentSpec {
    let labels = selector_labels(&app.metadata.name);
    DeploymentSpec {
        replicas: app.spec.replicas,
        selector: labels.clone(),
        template: PodTemplate {
            labels,
            container: ContainerSpec {
                name: app.metadata.name.clone(),
                image: app.spec.image.clone(),
                port: app.spec.port,
            },
        },
    }
}

/// A full deployment object, named after its owner and owned by it.
pub fn deployment_for(app: &AppService) -> Deployment {
    Deployment {
        metadata: child_meta(app),
        spec: deployment_spec_for(app),
    }
}

/// The service spec an AppService asks for.
///
/// `cluster_ip` is left unset: the platform assigns it at creation, and
/// update paths copy it over from the live object.
pub fn service_spec_for(app: &AppService) -> ServiceSpec {
    ServiceSpec {
        selector: selector_labels(&app.metadata.name),
        port: app.spec.port,
        target_port: app.spec.port,
        cluster_ip: None,
    }
}

/// A full service object, named after its owner and owned by it.
pub fn service_for(app: &AppService) -> Service {
    Service {
        metadata: child_meta(app),
        spec: service_spec_for(app),
    }
}

/// Whether the edit touched any field the service spec derives from.
///
/// The selector comes from the immutable identity, so only the port
/// matters; replica or image edits must not touch the service.
pub fn service_spec_changed(last_applied: &AppSpec, current: &AppSpec) -> bool {
    last_applied.port != current.port
}
