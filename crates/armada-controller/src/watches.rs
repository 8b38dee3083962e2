//! Watches on objects owned by Armada resources
//!
//! kube-rs controllers only watch kinds known at compile time. Helm releases
//! render arbitrary kinds, so the chart controller registers a watch per
//! dependent GVK at runtime and feeds the triggers back through
//! `Controller::reconcile_on`. Parent controllers use the same machinery
//! for their member kind.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use armada_common::crd::{ArmadaChart, HelmResource};
use armada_common::kube_utils::{helm_release_of, is_cluster_scoped, resolve_api_resource};
use armada_common::Error;
use armada_helm::HelmRelease;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::{Api, DynamicObject};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource, ResourceExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::predicate::{DependentEvent, DependentPredicate};

#[cfg(test)]
use mockall::automock;

/// Capacity of the trigger channel feeding a controller
pub const TRIGGER_BUFFER: usize = 256;

/// Dependent-watch registration used by the chart reconciler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependentWatches: Send + Sync {
    /// Route events on the objects of `release` to `chart`, watching any
    /// kind not watched yet
    async fn watch_release(&self, chart: &ArmadaChart, release: &HelmRelease) -> Result<(), Error>;

    /// Stop routing events for a release
    fn forget_release(&self, release: &str, namespace: &str);
}

/// Resolves which owners an observed object belongs to
struct OwnerIndex<P: HelmResource> {
    releases: DashMap<(String, String), ObjectRef<P>>,
}

impl<P: HelmResource> OwnerIndex<P> {
    fn new() -> Self {
        Self {
            releases: DashMap::new(),
        }
    }

    /// Controller owner of kind `P`, else the owner of the Helm release
    /// that rendered the object
    fn owners_of(&self, obj: &DynamicObject) -> Vec<ObjectRef<P>> {
        let kind = P::kind(&());
        let namespace = obj.namespace();
        let owned: Vec<ObjectRef<P>> = obj
            .owner_references()
            .iter()
            .filter(|r| r.controller == Some(true) && r.kind == kind)
            .map(|r| {
                let owner = ObjectRef::new(&r.name);
                match &namespace {
                    Some(ns) => owner.within(ns),
                    None => owner,
                }
            })
            .collect();
        if !owned.is_empty() {
            return owned;
        }

        helm_release_of(obj.annotations())
            .and_then(|key| self.releases.get(&key).map(|owner| owner.clone()))
            .into_iter()
            .collect()
    }
}

/// Per-watch state: the last observation of every object, used to turn
/// watcher events into create/update/delete events
struct DependentTracker<P: HelmResource> {
    predicate: DependentPredicate,
    owners: Arc<OwnerIndex<P>>,
    seen: HashMap<ObjectKey, Value>,
    /// Objects listed so far while a relist is in progress
    relisted: Option<HashSet<ObjectKey>>,
}

type ObjectKey = (Option<String>, String);

impl<P: HelmResource> DependentTracker<P> {
    fn new(owners: Arc<OwnerIndex<P>>) -> Self {
        Self {
            predicate: DependentPredicate,
            owners,
            seen: HashMap::new(),
            relisted: None,
        }
    }

    /// Owners to trigger for one watcher event.
    ///
    /// A relist compares every listed object with its last observation and
    /// treats objects missing from the listing as deleted.
    fn observe(&mut self, event: Event<DynamicObject>) -> Vec<ObjectRef<P>> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                let key = key_of(&obj);
                self.relisted.get_or_insert_with(HashSet::new).insert(key.clone());
                let Ok(new) = serde_json::to_value(&obj) else {
                    return Vec::new();
                };
                match self.seen.insert(key, new.clone()) {
                    Some(old) => self.triggers(&DependentEvent::Update { old: &old, new: &new }, &obj),
                    None => Vec::new(),
                }
            }
            Event::InitDone => {
                let Some(listed) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<ObjectKey> = self
                    .seen
                    .keys()
                    .filter(|key| !listed.contains(*key))
                    .cloned()
                    .collect();
                let removed: Vec<Value> = gone
                    .iter()
                    .filter_map(|key| self.seen.remove(key))
                    .collect();
                removed.into_iter().flat_map(|last| self.vanished(last)).collect()
            }
            Event::Apply(obj) => {
                let Ok(new) = serde_json::to_value(&obj) else {
                    return Vec::new();
                };
                let old = self.seen.insert(key_of(&obj), new.clone());
                let event = match &old {
                    None => DependentEvent::Create(&new),
                    Some(old) => DependentEvent::Update { old, new: &new },
                };
                self.triggers(&event, &obj)
            }
            Event::Delete(obj) => {
                self.seen.remove(&key_of(&obj));
                let Ok(value) = serde_json::to_value(&obj) else {
                    return Vec::new();
                };
                self.triggers(&DependentEvent::Delete(&value), &obj)
            }
        }
    }

    fn triggers(&self, event: &DependentEvent<'_>, obj: &DynamicObject) -> Vec<ObjectRef<P>> {
        if self.predicate.should_reconcile(event) {
            self.owners.owners_of(obj)
        } else {
            Vec::new()
        }
    }

    /// Deletion missed while the watch was down, known only by its last
    /// observation
    fn vanished(&self, last: Value) -> Vec<ObjectRef<P>> {
        if !self.predicate.should_reconcile(&DependentEvent::Delete(&last)) {
            return Vec::new();
        }
        match serde_json::from_value::<DynamicObject>(last) {
            Ok(obj) => self.owners.owners_of(&obj),
            Err(e) => {
                debug!(error = %e, "Unreadable last observation of a deleted object");
                Vec::new()
            }
        }
    }
}

fn key_of(obj: &DynamicObject) -> ObjectKey {
    (obj.namespace(), obj.name_any())
}

/// Registry of runtime watches whose events reconcile an owner of kind `P`
pub struct DependentWatchRegistry<P: HelmResource> {
    client: Client,
    watch_namespace: Option<String>,
    watched: DashMap<GroupVersionKind, ()>,
    owners: Arc<OwnerIndex<P>>,
    trigger: mpsc::Sender<ObjectRef<P>>,
    cancel: CancellationToken,
}

impl<P: HelmResource> DependentWatchRegistry<P> {
    /// Registry sending triggers on `trigger` until `cancel` fires
    pub fn new(
        client: Client,
        watch_namespace: Option<String>,
        trigger: mpsc::Sender<ObjectRef<P>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            watch_namespace,
            watched: DashMap::new(),
            owners: Arc::new(OwnerIndex::new()),
            trigger,
            cancel,
        }
    }

    /// Watch `gvk` once; later calls for the same GVK do nothing
    pub async fn ensure_watch(&self, gvk: &GroupVersionKind) -> Result<(), Error> {
        if self.watched.contains_key(gvk) {
            return Ok(());
        }

        let (resource, caps) = resolve_api_resource(&self.client, gvk).await?;
        if is_cluster_scoped(&caps) {
            info!(
                kind = %gvk.kind,
                owner = %P::kind(&()),
                "Cluster-scoped dependents of namespaced owners are not watched"
            );
            self.watched.insert(gvk.clone(), ());
            return Ok(());
        }

        match self.watched.entry(gvk.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Ok(()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(());
            }
        }

        info!(
            group = %gvk.group,
            version = %gvk.version,
            kind = %gvk.kind,
            owner = %P::kind(&()),
            "Watching dependent resource"
        );
        self.spawn_watch(resource);
        Ok(())
    }

    /// Watch a kind known at compile time, e.g. the member kind of a parent
    pub fn watch_kind<K: Resource<DynamicType = ()>>(&self) {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        if self.watched.insert(gvk.clone(), ()).is_none() {
            info!(kind = %gvk.kind, owner = %P::kind(&()), "Watching member resource");
            self.spawn_watch(ApiResource::erase::<K>(&()));
        }
    }

    fn spawn_watch(&self, resource: ApiResource) {
        let api: Api<DynamicObject> = match &self.watch_namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &resource),
            None => Api::all_with(self.client.clone(), &resource),
        };
        let tracker = DependentTracker::new(self.owners.clone());
        let trigger = self.trigger.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(run_watch(api, resource.kind, tracker, trigger, cancel));
    }

    fn index_release(&self, release: &str, namespace: &str, owner: ObjectRef<P>) {
        self.owners
            .releases
            .insert((release.to_string(), namespace.to_string()), owner);
    }
}

async fn run_watch<P: HelmResource>(
    api: Api<DynamicObject>,
    kind: String,
    mut tracker: DependentTracker<P>,
    trigger: mpsc::Sender<ObjectRef<P>>,
    cancel: CancellationToken,
) {
    let mut stream = watcher::watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = stream.next() => event,
        };
        let event = match event {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                warn!(kind = %kind, error = %e, "Dependent watch error");
                continue;
            }
            None => break,
        };
        for owner in tracker.observe(event) {
            debug!(kind = %kind, owner = %owner, "Dependent change triggers reconcile");
            if trigger.send(owner).await.is_err() {
                debug!(kind = %kind, "Trigger channel closed, stopping dependent watch");
                return;
            }
        }
    }
    debug!(kind = %kind, "Dependent watch stopped");
}

#[async_trait]
impl DependentWatches for DependentWatchRegistry<ArmadaChart> {
    async fn watch_release(&self, chart: &ArmadaChart, release: &HelmRelease) -> Result<(), Error> {
        self.index_release(&release.name, &release.namespace, ObjectRef::from_obj(chart));

        let mut first_error = None;
        let mut kinds: Vec<&GroupVersionKind> = Vec::new();
        for dependent in release.dependents() {
            if kinds.contains(&&dependent.gvk) {
                continue;
            }
            kinds.push(&dependent.gvk);
            if let Err(e) = self.ensure_watch(&dependent.gvk).await {
                warn!(kind = %dependent.gvk.kind, error = %e, "Failed to watch dependent kind");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn forget_release(&self, release: &str, namespace: &str) {
        self.owners
            .releases
            .remove(&(release.to_string(), namespace.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armada_common::crd::ArmadaChartGroup;
    use armada_common::kube_utils::{
        HELM_RELEASE_NAME_ANNOTATION, HELM_RELEASE_NAMESPACE_ANNOTATION,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn config_map(name: &str) -> DynamicObject {
        let resource = ApiResource::erase::<k8s_openapi::api::core::v1::ConfigMap>(&());
        let mut obj = DynamicObject::new(name, &resource).within("openstack");
        obj.data = serde_json::json!({"data": {"key": "value"}});
        obj
    }

    fn deployment(name: &str, replicas: i64) -> DynamicObject {
        let resource = ApiResource::erase::<k8s_openapi::api::apps::v1::Deployment>(&());
        let mut obj = DynamicObject::new(name, &resource).within("openstack");
        obj.data = serde_json::json!({"spec": {"replicas": replicas}});
        obj
    }

    fn released_by(mut obj: DynamicObject, release: &str) -> DynamicObject {
        obj.metadata.annotations = Some(
            [
                (HELM_RELEASE_NAME_ANNOTATION.to_string(), release.to_string()),
                (HELM_RELEASE_NAMESPACE_ANNOTATION.to_string(), "openstack".to_string()),
            ]
            .into(),
        );
        obj
    }

    fn owned_by_group(mut obj: DynamicObject, group: &str) -> DynamicObject {
        obj.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "armada.airshipit.org/v1alpha1".to_string(),
            kind: "ArmadaChartGroup".to_string(),
            name: group.to_string(),
            uid: "uid".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        obj
    }

    fn chart_index() -> Arc<OwnerIndex<ArmadaChart>> {
        let index = OwnerIndex::new();
        index.releases.insert(
            ("keystone".to_string(), "openstack".to_string()),
            ObjectRef::new("keystone").within("armada"),
        );
        Arc::new(index)
    }

    mod owners {
        use super::*;

        #[test]
        fn helm_annotations_map_to_the_indexed_chart() {
            let index = chart_index();
            let owners = index.owners_of(&released_by(deployment("keystone-api", 1), "keystone"));
            assert_eq!(owners, vec![ObjectRef::new("keystone").within("armada")]);
        }

        #[test]
        fn unknown_release_has_no_owner() {
            let index = chart_index();
            let owners = index.owners_of(&released_by(deployment("glance-api", 1), "glance"));
            assert!(owners.is_empty());
        }

        #[test]
        fn controller_owner_reference_of_the_owner_kind_wins() {
            let index: OwnerIndex<ArmadaChartGroup> = OwnerIndex::new();
            let chart = DynamicObject::new(
                "mariadb",
                &ApiResource::erase::<ArmadaChart>(&()),
            )
            .within("armada");
            let owners = index.owners_of(&owned_by_group(chart, "infra"));
            assert_eq!(owners, vec![ObjectRef::new("infra").within("armada")]);
        }
    }

    mod tracking {
        use super::*;

        /// Story: the initial listing seeds the store, a spec edit triggers
        /// the chart, a no-op resync does not, and a deletion does.
        #[test]
        fn deployment_lifecycle_triggers_its_chart() {
            let mut tracker = DependentTracker::new(chart_index());
            let original = released_by(deployment("keystone-api", 1), "keystone");
            let scaled = released_by(deployment("keystone-api", 3), "keystone");
            let expected = vec![ObjectRef::<ArmadaChart>::new("keystone").within("armada")];

            assert!(tracker.observe(Event::Init).is_empty());
            assert!(tracker.observe(Event::InitApply(original.clone())).is_empty());
            assert!(tracker.observe(Event::InitDone).is_empty());

            assert_eq!(tracker.observe(Event::Apply(scaled.clone())), expected);
            assert!(tracker.observe(Event::Apply(scaled.clone())).is_empty());
            assert_eq!(tracker.observe(Event::Delete(scaled)), expected);
        }

        /// Story: the watch drops while one deployment is deleted and another
        /// is scaled. The relist reports both to the chart and forgets the
        /// deleted one.
        #[test]
        fn relist_catches_up_on_missed_changes() {
            let mut tracker = DependentTracker::new(chart_index());
            let api = released_by(deployment("keystone-api", 1), "keystone");
            let worker = released_by(deployment("keystone-worker", 1), "keystone");
            let expected = vec![ObjectRef::<ArmadaChart>::new("keystone").within("armada")];

            tracker.observe(Event::Init);
            tracker.observe(Event::InitApply(api.clone()));
            tracker.observe(Event::InitApply(worker));
            tracker.observe(Event::InitDone);

            assert!(tracker.observe(Event::Init).is_empty());
            let scaled = released_by(deployment("keystone-api", 2), "keystone");
            assert_eq!(tracker.observe(Event::InitApply(scaled)), expected);
            assert_eq!(tracker.observe(Event::InitDone), expected);

            assert_eq!(tracker.seen.len(), 1);
            assert!(tracker.seen.contains_key(&key_of(&api)));
        }

        #[test]
        fn new_objects_do_not_trigger() {
            let mut tracker = DependentTracker::new(chart_index());
            let created = released_by(deployment("keystone-api", 1), "keystone");
            assert!(tracker.observe(Event::Apply(created)).is_empty());
        }

        #[test]
        fn config_map_edits_do_not_trigger() {
            let mut tracker = DependentTracker::new(chart_index());
            let original = released_by(config_map("keystone-etc"), "keystone");
            let mut edited = original.clone();
            edited.data = serde_json::json!({"data": {"key": "changed"}});

            tracker.observe(Event::InitApply(original));
            assert!(tracker.observe(Event::Apply(edited)).is_empty());
        }
    }
}
