use std::sync::Arc;

use parking_lot::Mutex;
use tokio::{sync::oneshot, task};

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

struct Listener {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

/// Fan-out hub for job status transitions and scheduler diagnostics.
///
/// Producers hold a cloned [`flume::Sender`] from [`EventBus::get_sender`];
/// a single background task drains the channel and hands each event to
/// every registered [`EventSink`]. Delivery order matches send order.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    tx: flume::Sender<Event>,
    rx: flume::Receiver<Event>,
    listener: Mutex<Option<Listener>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Build a bus delivering to a single sink.
    pub fn with_sink<T: EventSink + 'static>(sink: T) -> Self {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Build a bus delivering to the given sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (tx, rx) = flume::unbounded();
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            tx,
            rx,
            listener: Mutex::new(None),
        }
    }

    /// Register an additional sink. Takes effect for all later events,
    /// including while the listener is running.
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        self.sinks.lock().push(Box::new(sink));
    }

    /// Clone of the producer handle. Cheap; hand one to each emitter.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.tx.clone()
    }

    /// Spawn the delivery task. Idempotent: a second call while the
    /// listener is alive does nothing, so events are never delivered twice.
    pub fn listen_for_events(&self) {
        let mut slot = self.listener.lock();
        if slot.is_some() {
            return;
        }

        let rx = self.rx.clone();
        let sinks = Arc::clone(&self.sinks);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    received = rx.recv_async() => {
                        let Ok(event) = received else {
                            // All senders dropped; nothing left to deliver.
                            break;
                        };
                        deliver(&sinks, &event);
                    }
                }
            }
        });

        *slot = Some(Listener {
            shutdown_tx,
            handle,
        });
    }

    /// Signal the delivery task to stop and wait for it to finish.
    /// Events already queued before the signal may still be delivered.
    pub async fn stop_listener(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            let _ = listener.shutdown_tx.send(());
            let _ = listener.handle.await;
        }
    }
}

fn deliver(sinks: &Mutex<Vec<Box<dyn EventSink>>>, event: &Event) {
    for sink in sinks.lock().iter_mut() {
        if let Err(error) = sink.handle(event) {
            tracing::warn!(%error, "event sink rejected an event");
        }
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            let _ = listener.shutdown_tx.send(());
            listener.handle.abort();
        }
    }
}
