//! Join/cleanup orchestration.
//!
//! [`Multiplexer::attach`] decides between a private connection and the
//! endpoint's shared one, and returns an [`Attachment`] that undoes exactly
//! that decision when detached or dropped.
//!
//! ```text
//! attach(share = true)
//!   ├─ registry lock
//!   │    ├─ entry present → join, read current state
//!   │    └─ entry absent  → create, wire shared listener, register
//!   └─ report initial state (lock released)
//!
//! detach(shared)
//!   ├─ registry lock → remove record; last one takes the entry out
//!   └─ close connection, stop keep-alive, report CLOSED (lock released)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::Result;
use crate::identifiers::ConnectionId;
use crate::protocol::{CloseEvent, Message, ReadyState};
use crate::transport::{ConnectionHandle, Connector};

use super::builder::MultiplexerBuilder;
use super::factory::ConnectionFactory;
use super::listeners::{exclusive, shared};
use super::options::{Options, OptionsRef};
use super::registry::{Registry, SharedEntry};
use super::subscriber::{Subscriber, SubscriberRecord};

// ============================================================================
// Multiplexer
// ============================================================================

/// Shares one physical connection per endpoint among many subscribers.
///
/// Cheap to clone; clones share the factory and registry.
#[derive(Clone)]
pub struct Multiplexer {
    factory: ConnectionFactory,
    registry: Registry,
}

impl fmt::Debug for Multiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Multiplexer")
            .field("platform", &self.factory.platform())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Multiplexer - Constructors
// ============================================================================

impl Multiplexer {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> MultiplexerBuilder {
        MultiplexerBuilder::new()
    }

    /// Creates a multiplexer with a fresh registry and default policy.
    #[must_use]
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self::new(
            ConnectionFactory::new(connector, super::Platform::detect(), Default::default()),
            Registry::new(),
        )
    }

    /// Creates a multiplexer from its parts.
    #[inline]
    #[must_use]
    pub fn new(factory: ConnectionFactory, registry: Registry) -> Self {
        Self { factory, registry }
    }

    /// Returns the shared-connection registry.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Returns the connection factory.
    #[inline]
    #[must_use]
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }
}

// ============================================================================
// Multiplexer - Attach
// ============================================================================

impl Multiplexer {
    /// Registers `subscriber`'s interest in `endpoint`.
    ///
    /// `options` is read now for `share`, protocols, headers, stream options
    /// and heartbeat, and again at every event for callbacks, filter and
    /// reconnect policy.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`](crate::Error::Config) if the options are invalid
    /// - [`Error::UnsupportedTransport`](crate::Error::UnsupportedTransport)
    ///   if an event stream is requested and the host cannot open one
    /// - [`Error::ConnectionCreation`](crate::Error::ConnectionCreation) if
    ///   the transport cannot be built
    ///
    /// On error the registry is left untouched.
    pub fn attach(
        &self,
        endpoint: &str,
        options: &OptionsRef,
        subscriber: Subscriber,
    ) -> Result<Attachment> {
        let snapshot = options.read().clone();
        snapshot.validate()?;

        let record = Arc::new(SubscriberRecord::new(
            endpoint,
            subscriber,
            Arc::clone(options),
        ));

        if snapshot.share {
            self.attach_shared(endpoint, &snapshot, record)
        } else {
            self.attach_exclusive(endpoint, &snapshot, record)
        }
    }

    fn attach_exclusive(
        &self,
        endpoint: &str,
        options: &Options,
        record: Arc<SubscriberRecord>,
    ) -> Result<Attachment> {
        let handle = self.factory.create(endpoint, options)?;

        record.report_state(ReadyState::Connecting);
        let teardown = exclusive::attach(&handle, Arc::clone(&record), options.heartbeat.clone());

        debug!(
            endpoint,
            connection_id = %handle.id(),
            subscriber_id = %record.id(),
            "Exclusive connection attached"
        );

        Ok(Attachment {
            handle,
            record,
            binding: Some(Binding::Exclusive(teardown)),
        })
    }

    fn attach_shared(
        &self,
        endpoint: &str,
        options: &Options,
        record: Arc<SubscriberRecord>,
    ) -> Result<Attachment> {
        let (handle, created) = {
            let mut state = self.registry.lock();

            match state.handle(endpoint).cloned() {
                Some(handle) => {
                    state.join(endpoint, Arc::clone(&record));
                    (handle, false)
                }
                None => {
                    let handle = self.factory.create(endpoint, options)?;
                    let keep_alive =
                        shared::attach(&self.registry, &handle, options.heartbeat.clone());
                    state.insert(
                        endpoint,
                        SharedEntry {
                            handle: handle.clone(),
                            keep_alive,
                        },
                        Arc::clone(&record),
                    );
                    (handle, true)
                }
            }
        };

        let initial = if created {
            ReadyState::Connecting
        } else {
            handle.ready_state()
        };
        if created {
            record.report_state(initial);
        } else {
            record.report_join(initial);
        }

        debug!(
            endpoint,
            connection_id = %handle.id(),
            subscriber_id = %record.id(),
            created,
            state = %initial,
            subscribers = self.registry.subscriber_count(endpoint),
            "Shared connection attached"
        );

        Ok(Attachment {
            handle,
            record,
            binding: Some(Binding::Shared(self.registry.clone())),
        })
    }
}

// ============================================================================
// Attachment
// ============================================================================

/// How an attachment is undone.
enum Binding {
    Exclusive(exclusive::Teardown),
    Shared(Registry),
}

/// One subscriber's live interest in an endpoint.
///
/// Detach with [`detach`](Self::detach) or by dropping it. Either way it
/// happens exactly once and never fails.
pub struct Attachment {
    handle: ConnectionHandle,
    record: Arc<SubscriberRecord>,
    binding: Option<Binding>,
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("endpoint", &self.endpoint())
            .field("connection_id", &self.connection_id())
            .field("shared", &self.is_shared())
            .field("state", &self.ready_state())
            .finish()
    }
}

// ============================================================================
// Attachment - Accessors
// ============================================================================

impl Attachment {
    /// Returns the endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.handle.endpoint()
    }

    /// Returns the connection this attachment is bound to.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.handle.id()
    }

    /// Returns `true` for shared-mode attachments.
    #[inline]
    #[must_use]
    pub fn is_shared(&self) -> bool {
        matches!(self.binding, Some(Binding::Shared(_)))
    }

    /// Returns the last state reported to this subscriber.
    #[inline]
    #[must_use]
    pub fn ready_state(&self) -> ReadyState {
        self.record.reported_state()
    }

    /// Returns the subscriber's reconnect counter value.
    #[inline]
    #[must_use]
    pub fn reconnect_count(&self) -> u32 {
        self.record.counter().get()
    }

    /// Returns when this subscriber last received a message.
    #[inline]
    #[must_use]
    pub fn last_message_at(&self) -> Option<Instant> {
        self.record.last_message_at()
    }

    /// Returns the live options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &OptionsRef {
        self.record.options()
    }
}

// ============================================================================
// Attachment - Sending
// ============================================================================

impl Attachment {
    /// Sends a message on the connection.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`](crate::Error::NotConnected) before the
    ///   connection opens
    /// - [`Error::ConnectionClosed`](crate::Error::ConnectionClosed) after it
    ///   closes
    /// - [`Error::SendUnsupported`](crate::Error::SendUnsupported) on event
    ///   streams
    pub fn send(&self, message: Message) -> Result<()> {
        self.handle.send(message)
    }

    /// Sends a text message.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text))
    }

    /// Serializes `value` to JSON and sends it as text.
    ///
    /// # Errors
    ///
    /// [`Error::Json`](crate::Error::Json) if serialization fails, otherwise see
    /// [`send`](Self::send).
    pub fn send_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.send(Message::json(value)?)
    }
}

// ============================================================================
// Attachment - Detach
// ============================================================================

impl Attachment {
    /// Ends this subscriber's interest.
    ///
    /// Shared: the subscriber is removed; the last one out closes the
    /// connection and frees the endpoint. Exclusive: the connection is
    /// closed. Close-time errors are logged and discarded.
    pub fn detach(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(binding) = self.binding.take() else {
            return;
        };

        match binding {
            Binding::Exclusive(teardown) => {
                self.handle.close_intentionally();
                teardown.run();
                self.record.close_out(&CloseEvent::normal());
                self.record.deactivate();
                debug!(
                    endpoint = %self.handle.endpoint(),
                    connection_id = %self.handle.id(),
                    "Exclusive connection detached"
                );
            }

            Binding::Shared(registry) => {
                self.record.deactivate();

                let last = registry
                    .lock()
                    .leave(self.handle.endpoint(), self.record.id(), self.handle.id());

                let Some(entry) = last else {
                    debug!(
                        endpoint = %self.handle.endpoint(),
                        subscriber_id = %self.record.id(),
                        "Subscriber left shared connection"
                    );
                    return;
                };

                entry.handle.close_intentionally();
                if let Some(keep_alive) = entry.keep_alive {
                    keep_alive.stop();
                }
                self.record.close_out(&CloseEvent::normal());

                info!(
                    endpoint = %self.handle.endpoint(),
                    connection_id = %self.handle.id(),
                    "Last subscriber left, shared connection closed"
                );
            }
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::Mutex;
    use proptest::prelude::*;

    use crate::error::Error;
    use crate::mux::options::HeartbeatOptions;
    use crate::mux::platform::{Host, Os, Platform};
    use crate::transport::connector::StreamOptions;
    use crate::transport::{MemoryConnector, MemoryTransport, Transport, TransportKind};

    const ENDPOINT: &str = "wss://feed.example/live";

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    #[derive(Clone, Default)]
    struct Recorder {
        states: Arc<Mutex<Vec<ReadyState>>>,
        messages: Arc<Mutex<Vec<String>>>,
        reconnects: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn subscriber(&self) -> Subscriber {
            let states = Arc::clone(&self.states);
            let messages = Arc::clone(&self.messages);
            let reconnects = Arc::clone(&self.reconnects);

            Subscriber::new()
                .with_state(move |state| states.lock().push(state))
                .with_message(move |message| {
                    messages
                        .lock()
                        .push(message.as_text().unwrap_or_default().to_string());
                })
                .with_reconnect(move || {
                    reconnects.fetch_add(1, Ordering::SeqCst);
                })
        }

        fn states(&self) -> Vec<ReadyState> {
            self.states.lock().clone()
        }

        fn messages(&self) -> Vec<String> {
            self.messages.lock().clone()
        }

        fn reconnects(&self) -> usize {
            self.reconnects.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Multiplexer, Arc<MemoryConnector>) {
        setup_with(MemoryConnector::new())
    }

    fn setup_with(connector: MemoryConnector) -> (Multiplexer, Arc<MemoryConnector>) {
        let connector = Arc::new(connector);
        let mux = Multiplexer::builder()
            .connector(Arc::clone(&connector) as Arc<dyn Connector>)
            .platform(Platform::new(Os::Other, Host::Browser))
            .build()
            .expect("build");
        (mux, connector)
    }

    fn last(connector: &MemoryConnector) -> Arc<MemoryTransport> {
        connector.last().expect("transport created")
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    // ------------------------------------------------------------------------
    // Shared mode
    // ------------------------------------------------------------------------

    #[test]
    fn test_shared_attaches_use_one_connection() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let recorders: Vec<Recorder> = (0..3).map(|_| Recorder::default()).collect();

        let attachments: Vec<Attachment> = recorders
            .iter()
            .map(|recorder| mux.attach(ENDPOINT, &options, recorder.subscriber()).expect("attach"))
            .collect();

        assert_eq!(connector.created_count(), 1);
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), 3);
        assert!(
            attachments
                .windows(2)
                .all(|pair| pair[0].handle().same_connection(pair[1].handle()))
        );

        last(&connector).open();

        for recorder in &recorders {
            assert_eq!(recorder.states(), vec![ReadyState::Connecting, ReadyState::Open]);
        }
        assert!(attachments.iter().all(Attachment::is_shared));
    }

    #[test]
    fn test_detach_one_keeps_others() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let (a, b, c) = (Recorder::default(), Recorder::default(), Recorder::default());

        let first = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        let _second = mux.attach(ENDPOINT, &options, b.subscriber()).expect("attach");
        let _third = mux.attach(ENDPOINT, &options, c.subscriber()).expect("attach");

        let transport = last(&connector);
        transport.open();
        first.detach();
        transport.push("after");

        assert_eq!(transport.close_calls(), 0);
        assert_eq!(transport.ready_state(), ReadyState::Open);
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), 2);
        assert!(a.messages().is_empty());
        assert_eq!(b.messages(), vec!["after".to_string()]);
        assert_eq!(c.messages(), vec!["after".to_string()]);
        assert_eq!(a.states(), vec![ReadyState::Connecting, ReadyState::Open]);
    }

    #[test]
    fn test_last_detach_closes_and_purges() {
        let (mux, connector) = setup();
        let closes = Arc::new(AtomicUsize::new(0));
        let close_count = Arc::clone(&closes);
        let options = Options::shared()
            .on_close(move |_| {
                close_count.fetch_add(1, Ordering::SeqCst);
            })
            .into_shared();
        let (a, b) = (Recorder::default(), Recorder::default());

        let first = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        let second = mux.attach(ENDPOINT, &options, b.subscriber()).expect("attach");
        let old_id = second.connection_id();
        let transport = last(&connector);
        transport.open();

        first.detach();
        second.detach();

        assert_eq!(transport.close_calls(), 1);
        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert!(!mux.registry().contains(ENDPOINT));
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), 0);
        assert_eq!(
            b.states(),
            vec![ReadyState::Connecting, ReadyState::Open, ReadyState::Closed]
        );
        assert_eq!(a.states(), vec![ReadyState::Connecting, ReadyState::Open]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(a.reconnects() + b.reconnects(), 0);

        let again = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        assert_eq!(connector.created_count(), 2);
        assert_ne!(again.connection_id(), old_id);
        assert_eq!(again.ready_state(), ReadyState::Connecting);
    }

    #[test]
    fn test_late_joiner_reports_open() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let (a, b) = (Recorder::default(), Recorder::default());

        let _first = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        last(&connector).open();
        let second = mux.attach(ENDPOINT, &options, b.subscriber()).expect("attach");

        assert_eq!(b.states(), vec![ReadyState::Open]);
        assert_eq!(second.ready_state(), ReadyState::Open);
    }

    #[test]
    fn test_no_replay_for_late_joiner() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let (a, b) = (Recorder::default(), Recorder::default());

        let _first = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        let transport = last(&connector);
        transport.open();
        transport.push("one");
        let second = mux.attach(ENDPOINT, &options, b.subscriber()).expect("attach");
        transport.push("two");

        assert_eq!(a.messages(), vec!["one".to_string(), "two".to_string()]);
        assert_eq!(b.messages(), vec!["two".to_string()]);
        assert!(second.last_message_at().is_some());
    }

    #[test]
    fn test_detach_from_own_callback() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let slot: Arc<Mutex<Option<Attachment>>> = Arc::new(Mutex::new(None));
        let detach_slot = Arc::clone(&slot);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_sink = Arc::clone(&seen);

        let quitter = Subscriber::new()
            .with_state(move |state| {
                if state == ReadyState::Open {
                    let attachment = detach_slot.lock().take();
                    if let Some(attachment) = attachment {
                        attachment.detach();
                    }
                }
            })
            .with_message(move |m| seen_sink.lock().push(m.clone()));
        let stayer = Recorder::default();

        *slot.lock() = Some(mux.attach(ENDPOINT, &options, quitter).expect("attach"));
        let _stay = mux.attach(ENDPOINT, &options, stayer.subscriber()).expect("attach");

        let transport = last(&connector);
        transport.open();
        transport.push("hello");

        assert!(slot.lock().is_none());
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), 1);
        assert!(seen.lock().is_empty());
        assert_eq!(stayer.messages(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_options_are_read_live() {
        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let recorder = Recorder::default();

        let _attachment = mux.attach(ENDPOINT, &options, recorder.subscriber()).expect("attach");
        let transport = last(&connector);
        transport.open();
        transport.push("before");

        options.write().filter = Some(Arc::new(|m: &Message| m.as_text() != Some("noise")));
        transport.push("noise");
        transport.push("after");

        assert_eq!(recorder.messages(), vec!["before".to_string(), "after".to_string()]);
    }

    // ------------------------------------------------------------------------
    // Exclusive mode
    // ------------------------------------------------------------------------

    #[test]
    fn test_exclusive_attaches_are_independent() {
        let (mux, connector) = setup();
        let options = Options::new().into_shared();
        let (a, b) = (Recorder::default(), Recorder::default());

        let first = mux.attach(ENDPOINT, &options, a.subscriber()).expect("attach");
        let second = mux.attach(ENDPOINT, &options, b.subscriber()).expect("attach");

        assert_eq!(connector.created_count(), 2);
        assert_eq!(mux.registry().connection_count(), 0);
        assert!(!first.handle().same_connection(second.handle()));
        assert!(!first.is_shared());

        let transports = connector.transports();
        transports[0].open();
        transports[1].open();
        first.detach();
        transports[1].push("still here");

        assert_eq!(transports[0].close_calls(), 1);
        assert_eq!(transports[1].close_calls(), 0);
        assert_eq!(second.ready_state(), ReadyState::Open);
        assert_eq!(b.messages(), vec!["still here".to_string()]);
        assert_eq!(
            a.states(),
            vec![
                ReadyState::Connecting,
                ReadyState::Open,
                ReadyState::Closing,
                ReadyState::Closed
            ]
        );
        assert_eq!(a.reconnects(), 0);
    }

    #[test]
    fn test_exclusive_drop_detaches() {
        let (mux, connector) = setup();
        let attachment = mux
            .attach(ENDPOINT, &Options::new().into_shared(), Subscriber::new())
            .expect("attach");
        let transport = last(&connector);

        drop(attachment);

        assert_eq!(transport.close_calls(), 1);
        assert!(!transport.has_listener());
    }

    #[test]
    fn test_send_through_attachment() {
        let (mux, connector) = setup();
        let attachment = mux
            .attach(ENDPOINT, &Options::new().into_shared(), Subscriber::new())
            .expect("attach");

        assert!(matches!(attachment.send_text("early"), Err(Error::NotConnected)));

        let transport = last(&connector);
        transport.open();
        tokio_test::assert_ok!(attachment.send_text("hi"));
        tokio_test::assert_ok!(attachment.send_json(&serde_json::json!({ "op": "subscribe" })));

        assert_eq!(
            transport.sent(),
            vec![Message::text("hi"), Message::text(r#"{"op":"subscribe"}"#)]
        );
    }

    #[test]
    fn test_joiner_during_open_gets_on_open() {
        let (mux, connector) = setup();
        let (opens, bump) = counter();
        let joiner_options = Options::shared().on_open(move || bump()).into_shared();
        let joined: Arc<Mutex<Option<Attachment>>> = Arc::new(Mutex::new(None));

        let join_mux = mux.clone();
        let slot = Arc::clone(&joined);
        let first_options = Options::shared()
            .on_open(move || {
                let attachment = join_mux
                    .attach(ENDPOINT, &joiner_options, Subscriber::new())
                    .expect("join");
                *slot.lock() = Some(attachment);
            })
            .into_shared();

        let _first = mux.attach(ENDPOINT, &first_options, Subscriber::new()).expect("attach");
        last(&connector).open();

        let joiner = joined.lock().take().expect("joined");
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(joiner.ready_state(), ReadyState::Open);
        assert_eq!(connector.created_count(), 1);
    }

    #[test]
    fn test_concurrent_attaches_share_one_connection() {
        const THREADS: usize = 16;

        let (mux, connector) = setup();
        let options = Options::shared().into_shared();
        let barrier = std::sync::Barrier::new(THREADS);

        let (mux, options, barrier) = (&mux, &options, &barrier);
        let attachments: Vec<Attachment> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        mux.attach(ENDPOINT, options, Subscriber::new()).expect("attach")
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("worker"))
                .collect()
        });

        assert_eq!(connector.created_count(), 1);
        assert_eq!(mux.registry().connection_count(), 1);
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), THREADS);
        assert!(
            attachments
                .windows(2)
                .all(|pair| pair[0].handle().same_connection(pair[1].handle()))
        );
        assert!(mux.registry().is_consistent());

        std::thread::scope(|scope| {
            for attachment in attachments {
                scope.spawn(move || attachment.detach());
            }
        });

        assert!(!mux.registry().contains(ENDPOINT));
        assert_eq!(mux.registry().connection_count(), 0);
        assert_eq!(last(&connector).close_calls(), 1);
    }

    // ------------------------------------------------------------------------
    // Close and reconnect
    // ------------------------------------------------------------------------

    #[test]
    fn test_unclean_close_triggers_each_reconnect() {
        let (mux, connector) = setup();
        let reconnecting = Options::shared()
            .should_reconnect(|close| !close.was_clean)
            .into_shared();
        let never = Options::shared().into_shared();
        let (a, b, c) = (Recorder::default(), Recorder::default(), Recorder::default());

        let _a = mux.attach(ENDPOINT, &reconnecting, a.subscriber()).expect("attach");
        let _b = mux.attach(ENDPOINT, &reconnecting, b.subscriber()).expect("attach");
        let _c = mux.attach(ENDPOINT, &never, c.subscriber()).expect("attach");

        let transport = last(&connector);
        transport.open();
        transport.drop_connection();

        assert_eq!(a.reconnects(), 1);
        assert_eq!(b.reconnects(), 1);
        assert_eq!(c.reconnects(), 0);
        assert!(!mux.registry().contains(ENDPOINT));
        for recorder in [&a, &b, &c] {
            assert_eq!(
                recorder.states(),
                vec![
                    ReadyState::Connecting,
                    ReadyState::Open,
                    ReadyState::Closing,
                    ReadyState::Closed
                ]
            );
        }
    }

    #[test]
    fn test_clean_close_does_not_reconnect() {
        let (mux, connector) = setup();
        let recorder = Recorder::default();
        let _attachment = mux
            .attach(ENDPOINT, &Options::new().into_shared(), recorder.subscriber())
            .expect("attach");

        let transport = last(&connector);
        transport.open();
        transport.remote_close(CloseEvent::normal());

        assert_eq!(recorder.reconnects(), 0);
        assert_eq!(recorder.states().last(), Some(&ReadyState::Closed));
    }

    #[test]
    fn test_exclusive_unclean_close_reconnects() {
        let (mux, connector) = setup();
        let recorder = Recorder::default();
        let attachment = mux
            .attach(ENDPOINT, &Options::new().into_shared(), recorder.subscriber())
            .expect("attach");

        last(&connector).drop_connection();

        assert_eq!(recorder.reconnects(), 1);
        assert_eq!(attachment.reconnect_count(), 1);
    }

    #[test]
    fn test_close_reported_once() {
        let (mux, connector) = setup();
        let (closes, bump) = counter();
        let options = Options::shared()
            .should_reconnect(|close| !close.was_clean)
            .on_close(move |_| bump())
            .into_shared();
        let recorders = [Recorder::default(), Recorder::default()];

        let _attachments: Vec<_> = recorders
            .iter()
            .map(|recorder| mux.attach(ENDPOINT, &options, recorder.subscriber()).expect("attach"))
            .collect();

        let transport = last(&connector);
        transport.open();
        transport.remote_close(CloseEvent::abnormal("gone"));
        transport.emit(crate::protocol::TransportEvent::Close(CloseEvent::abnormal("again")));

        assert_eq!(closes.load(Ordering::SeqCst), 2);
        for recorder in &recorders {
            assert_eq!(recorder.reconnects(), 1);
            assert_eq!(
                recorder.states().iter().filter(|s| **s == ReadyState::Closed).count(),
                1
            );
        }
    }

    #[test]
    fn test_reconnect_reattach_gets_fresh_connection() {
        let (mux, connector) = setup();
        let options = Options::shared().should_reconnect(|_| true).into_shared();
        let reattached: Arc<Mutex<Vec<Attachment>>> = Arc::new(Mutex::new(Vec::new()));

        let trigger_mux = mux.clone();
        let trigger_options = Arc::clone(&options);
        let sink = Arc::clone(&reattached);
        let subscriber = Subscriber::new().with_reconnect(move || {
            let attachment = trigger_mux
                .attach(ENDPOINT, &trigger_options, Subscriber::new())
                .expect("reattach");
            sink.lock().push(attachment);
        });

        let original = mux.attach(ENDPOINT, &options, subscriber).expect("attach");
        let first = last(&connector);
        first.open();
        first.drop_connection();

        assert_eq!(connector.created_count(), 2);
        let current = mux.registry().handle(ENDPOINT).expect("new connection");
        assert!(!current.same_connection(original.handle()));
        assert_eq!(current.ready_state(), ReadyState::Connecting);

        drop(original);
        assert!(mux.registry().contains(ENDPOINT));
        reattached.lock().clear();
        assert!(!mux.registry().contains(ENDPOINT));
    }

    #[test]
    fn test_stream_retry_reattach_gets_fresh_connection() {
        let (mux, connector) = setup();
        let endpoint = "https://feed.example/events";
        let options = Options::shared()
            .with_stream(StreamOptions::new())
            .with_retry_on_error()
            .into_shared();
        let reattached: Arc<Mutex<Vec<Attachment>>> = Arc::new(Mutex::new(Vec::new()));

        let trigger_mux = mux.clone();
        let trigger_options = Arc::clone(&options);
        let sink = Arc::clone(&reattached);
        let subscriber = Subscriber::new().with_reconnect(move || {
            let attachment = trigger_mux
                .attach(endpoint, &trigger_options, Subscriber::new())
                .expect("reattach");
            sink.lock().push(attachment);
        });

        let original = mux.attach(endpoint, &options, subscriber).expect("attach");
        let first = last(&connector);
        first.open();
        first.drop_connection();

        assert_eq!(connector.created_count(), 2);
        let retried = reattached.lock().pop().expect("retried");
        assert!(!retried.handle().same_connection(original.handle()));
        assert_eq!(retried.ready_state(), ReadyState::Connecting);
        assert!(mux.registry().contains(endpoint));

        last(&connector).open();
        assert_eq!(retried.ready_state(), ReadyState::Open);
    }

    #[test]
    fn test_shared_close_without_predicate_does_not_reconnect() {
        let (mux, connector) = setup();
        let recorder = Recorder::default();
        let _attachment = mux
            .attach(ENDPOINT, &Options::shared().into_shared(), recorder.subscriber())
            .expect("attach");

        let transport = last(&connector);
        transport.open();
        transport.drop_connection();

        assert_eq!(recorder.reconnects(), 0);
        assert_eq!(recorder.states().last(), Some(&ReadyState::Closed));
    }

    #[test]
    fn test_reconnect_limit_stops() {
        let (mux, connector) = setup();
        let stopped = Arc::new(Mutex::new(None));
        let stop_sink = Arc::clone(&stopped);
        let options = Options::new()
            .with_reconnect_attempts(1)
            .on_reconnect_stop(move |n| *stop_sink.lock() = Some(n))
            .into_shared();
        let recorder = Recorder::default();
        let subscriber = recorder.subscriber();

        let first = mux.attach(ENDPOINT, &options, subscriber.clone()).expect("attach");
        last(&connector).drop_connection();
        first.detach();

        let second = mux.attach(ENDPOINT, &options, subscriber).expect("attach");
        last(&connector).drop_connection();

        assert_eq!(recorder.reconnects(), 1);
        assert_eq!(second.reconnect_count(), 1);
        assert_eq!(*stopped.lock(), Some(1));
    }

    // ------------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------------

    #[test]
    fn test_stream_retry_on_error() {
        let (mux, connector) = setup();
        let (errors, bump) = counter();
        let options = Options::shared()
            .with_stream(StreamOptions::new())
            .with_retry_on_error()
            .on_error(move |_| bump())
            .into_shared();
        let recorder = Recorder::default();

        let attachment = mux
            .attach("https://feed.example/events", &options, recorder.subscriber())
            .expect("attach");
        assert_eq!(attachment.handle().kind(), TransportKind::Stream);

        let transport = last(&connector);
        transport.open();
        transport.push("event");
        transport.drop_connection();

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.reconnects(), 1);
        assert_eq!(recorder.messages(), vec!["event".to_string()]);
        assert!(matches!(attachment.send_text("x"), Err(Error::SendUnsupported { .. })));
    }

    #[test]
    fn test_unsupported_stream_is_rejected() {
        let (mux, connector) = setup_with(MemoryConnector::new().with_streams(false));
        let options = Options::shared().with_stream(StreamOptions::new()).into_shared();
        let recorder = Recorder::default();

        let err = mux
            .attach("https://feed.example/events", &options, recorder.subscriber())
            .err()
            .expect("unsupported");

        assert!(matches!(err, Error::UnsupportedTransport { .. }));
        assert!(err.is_attach_error());
        assert_eq!(connector.created_count(), 0);
        assert_eq!(mux.registry().connection_count(), 0);
        assert!(recorder.states().is_empty());
    }

    #[test]
    fn test_creation_error_leaves_no_entry() {
        let (mux, connector) = setup();
        connector.fail_next("refused");
        let recorder = Recorder::default();

        let err = mux
            .attach(ENDPOINT, &Options::shared().into_shared(), recorder.subscriber())
            .err()
            .expect("creation error");

        assert!(matches!(err, Error::ConnectionCreation { .. }));
        assert!(!mux.registry().contains(ENDPOINT));
        assert_eq!(mux.registry().subscriber_count(ENDPOINT), 0);
        assert!(recorder.states().is_empty());

        mux.attach(ENDPOINT, &Options::shared().into_shared(), recorder.subscriber())
            .expect("next attach succeeds");
        assert_eq!(connector.created_count(), 1);
    }

    // ------------------------------------------------------------------------
    // Heartbeat
    // ------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_and_swallows_reply() {
        let (mux, connector) = setup();
        let options = Options::shared()
            .with_heartbeat(
                HeartbeatOptions::default()
                    .with_return_message("pong")
                    .with_interval(Duration::from_secs(1))
                    .with_timeout(Duration::from_secs(10)),
            )
            .into_shared();
        let recorder = Recorder::default();

        let _attachment = mux.attach(ENDPOINT, &options, recorder.subscriber()).expect("attach");
        let transport = last(&connector);
        transport.open();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        transport.push("pong");
        transport.push("data");

        assert_eq!(transport.sent(), vec![Message::text("ping")]);
        assert_eq!(recorder.messages(), vec!["data".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout_closes() {
        let (mux, connector) = setup();
        let options = Options::shared()
            .should_reconnect(|_| true)
            .with_heartbeat(
                HeartbeatOptions::default()
                    .with_interval(Duration::from_secs(1))
                    .with_timeout(Duration::from_secs(2)),
            )
            .into_shared();
        let recorder = Recorder::default();

        let _attachment = mux.attach(ENDPOINT, &options, recorder.subscriber()).expect("attach");
        let transport = last(&connector);
        transport.open();

        tokio::time::sleep(Duration::from_millis(3_500)).await;

        assert_eq!(transport.ready_state(), ReadyState::Closed);
        assert_eq!(recorder.reconnects(), 1);
        assert!(!mux.registry().contains(ENDPOINT));
    }

    // ------------------------------------------------------------------------
    // Real sockets
    // ------------------------------------------------------------------------

    async fn recv(rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("message in time")
            .expect("channel open")
    }

    #[tokio::test]
    async fn test_shared_socket_end_to_end() {
        use futures_util::{SinkExt, StreamExt};
        use tokio::net::TcpListener;
        use tokio::sync::mpsc::unbounded_channel;
        use tokio_tungstenite::tungstenite::Message as WsMessage;
        use tracing_subscriber::EnvFilter;

        use crate::transport::TokioConnector;

        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let port = listener.local_addr().expect("addr").port();

        // Accepts a single connection: greets, then echoes text until closed.
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("upgrade");
            ws.send(WsMessage::Text("welcome".into())).await.expect("greet");
            while let Some(Ok(frame)) = ws.next().await {
                match frame {
                    WsMessage::Text(_) => ws.send(frame).await.expect("echo"),
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
        });

        let mux = Multiplexer::builder()
            .connector(Arc::new(TokioConnector::new()))
            .build()
            .expect("build");
        let endpoint = format!("ws://127.0.0.1:{port}/live");
        let options = Options::shared().into_shared();

        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        let a = mux
            .attach(
                &endpoint,
                &options,
                Subscriber::new().with_message(move |m| {
                    let _ = tx_a.send(m.as_text().unwrap_or_default().to_string());
                }),
            )
            .expect("attach a");
        let b = mux
            .attach(
                &endpoint,
                &options,
                Subscriber::new().with_message(move |m| {
                    let _ = tx_b.send(m.as_text().unwrap_or_default().to_string());
                }),
            )
            .expect("attach b");

        assert!(a.handle().same_connection(b.handle()));
        assert_eq!(recv(&mut rx_a).await, "welcome");
        assert_eq!(recv(&mut rx_b).await, "welcome");

        a.send_text("echo").expect("send");
        assert_eq!(recv(&mut rx_a).await, "echo");
        assert_eq!(recv(&mut rx_b).await, "echo");

        a.detach();
        assert!(mux.registry().contains(&endpoint));
        b.detach();
        assert!(!mux.registry().contains(&endpoint));

        tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .expect("server finished")
            .expect("server task");
    }

    // ------------------------------------------------------------------------
    // Registry invariant
    // ------------------------------------------------------------------------

    #[derive(Debug, Clone)]
    enum Op {
        Attach(usize),
        Detach(usize),
        Open(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..3usize).prop_map(Op::Attach),
            (0..8usize).prop_map(Op::Detach),
            (0..3usize).prop_map(Op::Open),
        ]
    }

    proptest! {
        #[test]
        fn prop_registry_tracks_live_subscribers(ops in proptest::collection::vec(op(), 1..40)) {
            let (mux, connector) = setup();
            let options = Options::shared().into_shared();
            let endpoints = ["mem://a", "mem://b", "mem://c"];
            let mut live: Vec<Attachment> = Vec::new();

            for op in ops {
                match op {
                    Op::Attach(i) => {
                        live.push(mux.attach(endpoints[i], &options, Subscriber::new()).expect("attach"));
                    }
                    Op::Detach(i) if !live.is_empty() => {
                        live.swap_remove(i % live.len()).detach();
                    }
                    Op::Detach(_) => {}
                    Op::Open(i) => {
                        if let Some(handle) = mux.registry().handle(endpoints[i]) {
                            let transport = connector
                                .transports()
                                .into_iter()
                                .rev()
                                .find(|t| t.endpoint() == handle.endpoint());
                            if let Some(transport) = transport {
                                transport.open();
                            }
                        }
                    }
                }

                prop_assert!(mux.registry().is_consistent());
                for endpoint in endpoints {
                    let expected = live.iter().filter(|a| a.endpoint() == endpoint).count();
                    prop_assert_eq!(mux.registry().subscriber_count(endpoint), expected);
                    prop_assert_eq!(mux.registry().contains(endpoint), expected > 0);
                }
            }

            drop(live);
            prop_assert_eq!(mux.registry().connection_count(), 0);
        }
    }
}
