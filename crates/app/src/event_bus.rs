//! Hierarchical in-process event bus.
//!
//! Listeners register under a topic key. An event on `a.b.c` reaches the
//! listeners of `a`, `a.*`, `a.b`, `a.b.*`, `a.b.c`, `a.b.c.*` and
//! [`MATCH_ALL`](homehub_domain::event::topics::MATCH_ALL). Dispatch is a
//! scheduled job; each matched listener is another job, so
//! [`EventBus::dispatch`] returns before any listener runs. Listeners on
//! one key are started in registration order.
//!
//! Every delivered event is also published on a tokio [`broadcast`]
//! channel for live-feed consumers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, oneshot};
use tokio_stream::Stream;

use homehub_domain::auth::{BUS_SCOPE, Context, WRITE};
use homehub_domain::error::{HubError, SchedulerError};
use homehub_domain::event::Event;
use homehub_domain::id::ListenerId;

use crate::callback::{Callback, callback};
use crate::scheduler::Scheduler;
use crate::stream::lossy;

/// Default capacity of the live-feed channel.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

#[derive(Clone)]
enum Handler {
    Event(Callback<Event>),
    WithContext(Callback<(Event, Context)>),
}

struct Listener {
    id: ListenerId,
    handler: Handler,
    once: bool,
}

#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    listeners: Mutex<HashMap<String, Vec<Listener>>>,
    feed: broadcast::Sender<Event>,
}

/// Returned by the `listen*` methods.
#[derive(Clone)]
pub struct ListenerHandle {
    bus: EventBus,
    topic: String,
    id: ListenerId,
}

impl ListenerHandle {
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop receiving events.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::EventCallbackNotFound`] when the listener was
    /// already removed (for instance a once-listener that fired).
    pub fn unsubscribe(&self) -> Result<(), HubError> {
        self.bus.remove_listener(&self.topic, self.id)
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .finish()
    }
}

impl EventBus {
    #[must_use]
    pub fn new(scheduler: Scheduler) -> Self {
        Self::with_capacity(scheduler, DEFAULT_FEED_CAPACITY)
    }

    #[must_use]
    pub fn with_capacity(scheduler: Scheduler, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                scheduler,
                listeners: Mutex::new(HashMap::new()),
                feed,
            }),
        }
    }

    /// Schedule delivery of `event`.
    ///
    /// Delivery is dropped (and logged) when the event's context may not
    /// write to the bus.
    ///
    /// # Errors
    ///
    /// Returns a [`SchedulerError`] when the delivery job cannot be submitted.
    pub fn dispatch(&self, event: Event) -> Result<(), SchedulerError> {
        let bus = self.clone();
        self.inner.scheduler.submit(async move {
            bus.deliver(event);
            Ok(())
        })
    }

    /// Build an event and [`dispatch`](Self::dispatch) it.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch).
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: serde_json::Value,
        context: Context,
    ) -> Result<(), SchedulerError> {
        self.dispatch(Event::new(topic, payload, context))
    }

    /// Invoke `cb` with every event matching `topic`.
    pub fn listen(&self, topic: &str, cb: Callback<Event>) -> ListenerHandle {
        self.register(topic, Handler::Event(cb), false)
    }

    /// Like [`listen`](Self::listen), with the dispatching context passed
    /// alongside the event.
    pub fn listen_with_context(&self, topic: &str, cb: Callback<(Event, Context)>) -> ListenerHandle {
        self.register(topic, Handler::WithContext(cb), false)
    }

    /// Invoke `cb` for the first matching event only.
    pub fn listen_once(&self, topic: &str, cb: Callback<Event>) -> ListenerHandle {
        self.register(topic, Handler::Event(cb), true)
    }

    /// Resolve with the first event matching `topic` dispatched after this call.
    pub fn wait_for(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Event, HubError>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(Some(tx)));
        self.listen_once(
            topic,
            callback(move |event| {
                let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let Some(sender) = sender {
                    let _ = sender.send(event);
                }
                async { Ok(()) }
            }),
        );
        async move { rx.await.map_err(|_| SchedulerError::Cancelled.into()) }
    }

    /// Remove one listener.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::EventCallbackNotFound`] when no such listener is
    /// registered under `topic`.
    pub fn remove_listener(&self, topic: &str, id: ListenerId) -> Result<(), HubError> {
        let mut listeners = self.listeners();
        let removed = listeners.get_mut(topic).is_some_and(|list| {
            let before = list.len();
            list.retain(|l| l.id != id);
            list.len() != before
        });
        if listeners.get(topic).is_some_and(Vec::is_empty) {
            listeners.remove(topic);
        }
        if removed {
            Ok(())
        } else {
            Err(HubError::EventCallbackNotFound {
                topic: topic.to_string(),
                id: id.to_string(),
            })
        }
    }

    /// Number of listeners registered under exactly `topic`.
    #[must_use]
    pub fn listener_count(&self, topic: &str) -> usize {
        self.listeners().get(topic).map_or(0, Vec::len)
    }

    /// Raw receiver of the live feed.
    ///
    /// Returns a receiver that will get all events delivered *after* the
    /// subscription is created.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.feed.subscribe()
    }

    /// The live feed as a stream that skips over lag.
    pub fn stream(&self) -> impl Stream<Item = Event> + Send + use<> {
        lossy(self.subscribe(), "event bus")
    }

    fn register(&self, topic: &str, handler: Handler, once: bool) -> ListenerHandle {
        let id = ListenerId::new();
        self.listeners()
            .entry(topic.to_string())
            .or_default()
            .push(Listener { id, handler, once });
        tracing::debug!(topic, listener = %id, once, "listener registered");
        ListenerHandle {
            bus: self.clone(),
            topic: topic.to_string(),
            id,
        }
    }

    fn deliver(&self, event: Event) {
        if !event.context().authorize(BUS_SCOPE, WRITE) {
            tracing::warn!(
                topic = event.topic(),
                context = %event.context(),
                "unauthorized dispatch dropped"
            );
            return;
        }

        let matched = self.resolve(&event);
        tracing::debug!(topic = event.topic(), listeners = matched.len(), "dispatching event");

        for (id, handler) in matched {
            let job = match handler {
                Handler::Event(cb) => cb(event.clone()),
                Handler::WithContext(cb) => cb((event.clone(), event.context().clone())),
            };
            if let Err(err) = self.inner.scheduler.submit(job) {
                tracing::warn!(%err, topic = event.topic(), listener = %id, "failed to schedule listener");
            }
        }

        // No receivers is fine.
        let _ = self.inner.feed.send(event);
    }

    /// Matching handlers in resolution order. Once-listeners are removed
    /// here so that they cannot match a second dispatch.
    fn resolve(&self, event: &Event) -> Vec<(ListenerId, Handler)> {
        let mut listeners = self.listeners();
        let mut matched = Vec::new();
        for key in event.listener_keys() {
            let Some(list) = listeners.get_mut(&key) else {
                continue;
            };
            matched.extend(list.iter().map(|l| (l.id, l.handler.clone())));
            list.retain(|l| !l.once);
            if list.is_empty() {
                listeners.remove(&key);
            }
        }
        matched
    }

    fn listeners(&self) -> MutexGuard<'_, HashMap<String, Vec<Listener>>> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerConfig;
    use homehub_domain::auth::User;
    use homehub_domain::event::topics;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn bus() -> EventBus {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        scheduler.start();
        EventBus::new(scheduler)
    }

    fn event(topic: &str) -> Event {
        Event::new(topic, serde_json::json!({}), Context::system())
    }

    fn recorder(tag: &'static str, tx: &mpsc::UnboundedSender<(&'static str, String)>) -> Callback<Event> {
        let tx = tx.clone();
        callback(move |event: Event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((tag, event.topic().to_string()));
                Ok(())
            }
        })
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<(&'static str, String)>) -> Vec<&'static str> {
        let mut seen = Vec::new();
        while let Ok(Some((tag, _))) = tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
            seen.push(tag);
        }
        seen
    }

    // ── Live feed ──────────────────────────────────────────────────

    #[tokio::test]
    async fn should_deliver_event_to_subscriber() {
        let bus = bus();
        let mut rx = bus.subscribe();

        let event = event("entity.state_changed");
        let event_id = event.id();
        bus.dispatch(event).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.id(), event_id);
    }

    #[tokio::test]
    async fn should_deliver_event_to_multiple_subscribers() {
        let bus = bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = event("entity.created");
        let event_id = event.id();
        bus.dispatch(event).unwrap();

        assert_eq!(rx1.recv().await.unwrap().id(), event_id);
        assert_eq!(rx2.recv().await.unwrap().id(), event_id);
    }

    #[tokio::test]
    async fn should_succeed_when_no_subscribers() {
        let bus = bus();
        assert!(bus.dispatch(event("nobody.listens")).is_ok());
    }

    #[tokio::test]
    async fn should_not_deliver_events_published_before_subscription() {
        let bus = bus();
        bus.dispatch(event("early")).unwrap();
        tokio::task::yield_now().await;

        let mut rx = bus.subscribe();
        let later = event("later");
        let later_id = later.id();
        bus.dispatch(later).unwrap();

        assert_eq!(rx.recv().await.unwrap().id(), later_id);
    }

    // ── Listener resolution ────────────────────────────────────────

    #[tokio::test]
    async fn should_match_every_prefix_and_wildcard_of_topic() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for key in ["a", "a.*", "a.b", "a.b.*", "a.b.c", "a.b.c.*", topics::MATCH_ALL] {
            bus.listen(key, recorder(key, &tx));
        }
        bus.listen("a.x", recorder("a.x", &tx));
        bus.listen("b", recorder("b", &tx));

        bus.dispatch(event("a.b.c")).unwrap();

        let mut seen = drain(&mut rx).await;
        seen.sort_unstable();
        let mut expected = vec!["*", "a", "a.*", "a.b", "a.b.*", "a.b.c", "a.b.c.*"];
        expected.sort_unstable();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn should_fire_wildcard_listener_exactly_once_per_dispatch() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen("a.b.*", recorder("wild", &tx));

        bus.dispatch(event("a.b.c")).unwrap();
        bus.dispatch(event("a.b.c")).unwrap();

        assert_eq!(drain(&mut rx).await, vec!["wild", "wild"]);
    }

    #[tokio::test]
    async fn should_fire_same_topic_listeners_in_registration_order() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen("door", recorder("first", &tx));
        bus.listen("door", recorder("second", &tx));
        bus.listen("door", recorder("third", &tx));

        bus.dispatch(event("door")).unwrap();

        assert_eq!(drain(&mut rx).await, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn should_pass_context_to_context_listeners() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen_with_context(
            "door",
            callback(move |(_, context): (Event, Context)| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(context.user().name.clone());
                    Ok(())
                }
            }),
        );

        bus.dispatch(event("door")).unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("system"));
    }

    #[tokio::test]
    async fn should_return_before_listeners_run() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen("door", recorder("l", &tx));

        bus.dispatch(event("door")).unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(drain(&mut rx).await, vec!["l"]);
    }

    // ── Authorization ──────────────────────────────────────────────

    #[tokio::test]
    async fn should_drop_unauthorized_dispatch() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen(topics::MATCH_ALL, recorder("all", &tx));
        let mut feed = bus.subscribe();

        let guest = Context::new(User::new("guest", HashMap::new()), true);
        bus.dispatch(Event::new("door", serde_json::json!({}), guest))
            .unwrap();

        assert!(drain(&mut rx).await.is_empty());
        assert!(feed.try_recv().is_err());
    }

    #[tokio::test]
    async fn should_deliver_dispatch_from_user_with_bus_write() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.listen("door", recorder("door", &tx));

        let user = User::new(
            "writer",
            HashMap::from([(BUS_SCOPE.to_string(), vec![WRITE.to_string()])]),
        );
        bus.publish("door", serde_json::json!({}), Context::new(user, true))
            .unwrap();

        assert_eq!(drain(&mut rx).await, vec!["door"]);
    }

    // ── Registration lifecycle ─────────────────────────────────────

    #[tokio::test]
    async fn should_fire_once_listener_only_once() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus.listen_once("door", recorder("once", &tx));

        bus.dispatch(event("door")).unwrap();
        bus.dispatch(event("door")).unwrap();

        assert_eq!(drain(&mut rx).await, vec!["once"]);
        assert_eq!(bus.listener_count("door"), 0);
        assert!(handle.unsubscribe().is_err());
    }

    #[tokio::test]
    async fn should_stop_delivering_after_unsubscribe() {
        let bus = bus();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus.listen("door", recorder("l", &tx));

        handle.unsubscribe().unwrap();
        bus.dispatch(event("door")).unwrap();

        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn should_report_missing_listener_on_removal() {
        let bus = bus();
        let err = bus.remove_listener("door", ListenerId::new()).unwrap_err();
        assert!(matches!(err, HubError::EventCallbackNotFound { topic, .. } if topic == "door"));
    }

    #[tokio::test]
    async fn should_resolve_wait_for_on_first_match() {
        let bus = bus();
        let waiter = bus.wait_for("sensor.*");

        bus.dispatch(event("sensor.motion")).unwrap();
        bus.dispatch(event("sensor.door")).unwrap();

        let first = waiter.await.unwrap();
        assert_eq!(first.topic(), "sensor.motion");
        assert_eq!(bus.listener_count("sensor.*"), 0);
    }

    #[tokio::test]
    async fn should_stream_live_feed() {
        use tokio_stream::StreamExt;

        let bus = bus();
        let mut stream = Box::pin(bus.stream());
        bus.dispatch(event("one")).unwrap();
        bus.dispatch(event("two")).unwrap();

        assert_eq!(stream.next().await.unwrap().topic(), "one");
        assert_eq!(stream.next().await.unwrap().topic(), "two");
    }
}
