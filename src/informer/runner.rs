//! Informer
//!
//! Drives an `ObjectCache` from a kube watcher stream and fans the resulting
//! typed events out to registered handlers. Optionally re-delivers every
//! cached object on a fixed period, the way shared informers resync.

use super::cache::ObjectCache;
use super::event::{DeletedObject, EventHandler, WatchEvent};
use futures::StreamExt;
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Keeps one cache in step with the API server
pub struct Informer<K> {
    cache: Arc<ObjectCache<K>>,
    handlers: Vec<Arc<dyn EventHandler<K>>>,
    resync_period: Option<Duration>,
}

impl<K> Informer<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Create an informer feeding `cache`
    pub fn new(cache: Arc<ObjectCache<K>>) -> Self {
        Self {
            cache,
            handlers: Vec::new(),
            resync_period: None,
        }
    }

    /// Re-deliver all cached objects every `period`
    pub fn with_resync(mut self, period: Duration) -> Self {
        if !period.is_zero() {
            self.resync_period = Some(period);
        }
        self
    }

    /// Register a handler for this kind
    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler<K>>) {
        self.handlers.push(handler);
    }

    /// The cache this informer maintains
    pub fn cache(&self) -> &Arc<ObjectCache<K>> {
        &self.cache
    }

    /// Watch `api` until `shutdown` fires. Watch errors are retried with the
    /// watcher's default backoff and never end the loop.
    pub async fn run(self, api: Api<K>, shutdown: CancellationToken) {
        info!(kind = %self.cache.kind(), "Starting informer");

        let stream = watcher(api, watcher::Config::default()).default_backoff();
        futures::pin_mut!(stream);

        let mut resync = self
            .resync_period
            .map(|period| tokio::time::interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                next = stream.next() => match next {
                    Some(Ok(event)) => self.apply(event),
                    Some(Err(e)) => {
                        warn!(kind = %self.cache.kind(), error = %e, "Watch stream error");
                    }
                    None => break,
                },
                _ = next_tick(&mut resync) => self.resync(),
            }
        }

        info!(kind = %self.cache.kind(), "Informer stopped");
    }

    /// Apply one watcher event to the cache and notify handlers
    pub fn apply(&self, event: watcher::Event<K>) {
        match event {
            watcher::Event::Applied(obj) => {
                let (new, old) = self.cache.apply(obj);
                match old {
                    Some(old) => self.dispatch(WatchEvent::Updated { old, new }),
                    None => self.dispatch(WatchEvent::Added(new)),
                }
            }
            watcher::Event::Deleted(obj) => {
                self.cache.remove(&obj.name_any());
                self.dispatch(WatchEvent::Deleted(DeletedObject::Final(Arc::new(obj))));
            }
            watcher::Event::Restarted(objects) => {
                let replaced = self.cache.replace(objects);
                debug!(
                    kind = %self.cache.kind(),
                    listed = replaced.applied.len(),
                    vanished = replaced.removed.len(),
                    "Watch (re)listed"
                );
                for (new, old) in replaced.applied {
                    match old {
                        Some(old) => self.dispatch(WatchEvent::Updated { old, new }),
                        None => self.dispatch(WatchEvent::Added(new)),
                    }
                }
                for gone in replaced.removed {
                    debug!(kind = %self.cache.kind(), name = %gone.name_any(), "Recovered deleted object from tombstone");
                    self.dispatch(WatchEvent::Deleted(DeletedObject::StateUnknown(gone)));
                }
            }
        }
    }

    /// Re-deliver every cached object as an update to itself
    pub fn resync(&self) {
        if !self.cache.is_synced() {
            return;
        }
        for obj in self.cache.snapshot() {
            self.dispatch(WatchEvent::Updated {
                old: obj.clone(),
                new: obj,
            });
        }
    }

    fn dispatch(&self, event: WatchEvent<K>) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::VolumeSnapshotClass;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl EventHandler<VolumeSnapshotClass> for Recorder {
        fn handle(&self, event: &WatchEvent<VolumeSnapshotClass>) {
            let line = match event {
                WatchEvent::Added(obj) => format!("add {}", obj.name_any()),
                WatchEvent::Updated { old, new } => {
                    format!("update {} {}->{}", new.name_any(), old.driver, new.driver)
                }
                WatchEvent::Deleted(DeletedObject::Final(obj)) => {
                    format!("delete {}", obj.name_any())
                }
                WatchEvent::Deleted(DeletedObject::StateUnknown(obj)) => {
                    format!("tombstone {}", obj.name_any())
                }
            };
            self.events.lock().push(line);
        }
    }

    fn informer() -> (Informer<VolumeSnapshotClass>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let mut informer = Informer::new(Arc::new(ObjectCache::new()));
        informer.add_handler(recorder.clone());
        (informer, recorder)
    }

    #[test]
    fn test_applied_and_deleted_events() {
        let (informer, recorder) = informer();
        informer.apply(watcher::Event::Restarted(vec![]));
        informer.apply(watcher::Event::Applied(VolumeSnapshotClass::new("a", "d1")));
        informer.apply(watcher::Event::Applied(VolumeSnapshotClass::new("a", "d2")));
        informer.apply(watcher::Event::Deleted(VolumeSnapshotClass::new("a", "d2")));

        assert_eq!(
            *recorder.events.lock(),
            vec!["add a", "update a d1->d2", "delete a"]
        );
        assert!(informer.cache().is_empty());
    }

    #[test]
    fn test_relist_emits_tombstones() {
        let (informer, recorder) = informer();
        informer.apply(watcher::Event::Restarted(vec![
            VolumeSnapshotClass::new("a", "d"),
            VolumeSnapshotClass::new("b", "d"),
        ]));
        assert!(informer.cache().is_synced());

        informer.apply(watcher::Event::Restarted(vec![VolumeSnapshotClass::new("a", "d")]));

        let events = recorder.events.lock();
        assert_eq!(&events[..2], &["add a", "add b"]);
        assert_eq!(&events[2..], &["update a d->d", "tombstone b"]);
    }

    #[test]
    fn test_resync_redelivers_cached_objects() {
        let (informer, recorder) = informer();
        informer.resync();
        assert!(recorder.events.lock().is_empty());

        informer.apply(watcher::Event::Restarted(vec![VolumeSnapshotClass::new("a", "d")]));
        informer.resync();
        assert_eq!(recorder.events.lock().last().unwrap(), "update a d->d");
    }
}
