//! Idempotent upsert of per-release target objects
//!
//! Every target kind is named after its Release, lives in the Release's
//! namespace and is controller-owned by it. The spec is only written when it
//! differs from what is stored.

use crate::crd::{Release, APP_LABEL, RELEASE_LABEL};
use crate::store::{ObjectStore, StoreError};
use kube::core::object::HasSpec;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// Labels copied from the owning Release onto its targets
fn target_labels(owner: &Release) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    if let Some(app) = owner.labels().get(APP_LABEL) {
        labels.insert(APP_LABEL.to_string(), app.clone());
    }
    labels.insert(RELEASE_LABEL.to_string(), owner.name_any());
    labels
}

/// Make the stored target of `owner` carry `spec`
///
/// `build` is the kind's constructor (`CapacityTarget::new` and friends).
/// Returns the stored object, including whatever status the executors
/// reported.
pub async fn upsert_target<K>(
    store: &dyn ObjectStore<K>,
    owner: &Release,
    spec: K::Spec,
    build: fn(&str, K::Spec) -> K,
) -> Result<K, StoreError>
where
    K: Resource<DynamicType = ()> + HasSpec + Clone + Send + Sync + 'static,
    K::Spec: PartialEq + Debug,
{
    let name = owner.name_any();
    let namespace = owner.namespace().unwrap_or_default();
    let kind = K::kind(&());

    match store.get(&namespace, &name).await? {
        Some(existing) if *existing.spec() == spec => {
            debug!(kind = %kind, target = %name, "Target spec unchanged");
            Ok(existing)
        }
        Some(mut existing) => {
            info!(kind = %kind, target = %name, spec = ?spec, "Updating target spec");
            *existing.spec_mut() = spec;
            store.replace(&namespace, &existing).await
        }
        None => {
            info!(kind = %kind, target = %name, spec = ?spec, "Creating target");
            let mut target = build(&name, spec);
            let meta = target.meta_mut();
            meta.namespace = Some(namespace.clone());
            meta.labels = Some(target_labels(owner));
            meta.owner_references = owner.controller_owner_ref(&()).map(|owner| vec![owner]);
            store.create(&namespace, &target).await
        }
    }
}
