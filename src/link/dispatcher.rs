//! Background dispatcher for receiving transports.

use super::mqueue::{Readiness, Role};
use super::transport::QueueTransport;
use crate::codec::Sample;
use crate::error::{Error, Result};
use crate::observability::{record_queue_depth, span_stream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// A receiving transport plus the thread that drains it.
///
/// The dispatcher thread sleeps in `poll(2)` until the queue has messages,
/// then forwards everything queued to the transport's output. Decode failures
/// are logged and skipped; the thread keeps running until
/// [`shutdown`](Self::shutdown) or drop, or until receiving itself fails.
pub struct ReceiveStream<M> {
    transport: Arc<QueueTransport<M>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<M: Sample> ReceiveStream<M> {
    /// Start dispatching from `transport`, which must be a linked receiver.
    pub fn spawn(transport: Arc<QueueTransport<M>>) -> Result<Self> {
        if transport.role() != Role::Receiver {
            return Err(Error::WrongDirection("queue sender"));
        }
        if transport.queue().is_closed() {
            return Err(Error::QueueClosed);
        }

        let worker = Arc::clone(&transport);
        let handle = thread::Builder::new()
            .name("topiclink-rx".to_string())
            .spawn(move || run(&worker))?;

        Ok(Self {
            transport,
            thread: Mutex::new(Some(handle)),
        })
    }
}

impl<M> ReceiveStream<M> {
    /// The transport being drained.
    pub fn transport(&self) -> &Arc<QueueTransport<M>> {
        &self.transport
    }

    /// Whether the dispatcher thread is still running.
    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Stop the dispatcher, wait for it to exit and close the queue.
    ///
    /// Safe to call more than once and while the thread is blocked waiting.
    pub fn shutdown(&self) {
        self.transport.shutdown();
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(topic = %self.transport.topic(), "dispatcher thread panicked");
            }
        }
        self.transport.close();
    }
}

impl<M> Drop for ReceiveStream<M> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<M: Sample>(transport: &QueueTransport<M>) {
    let _span = span_stream(transport.topic(), Role::Receiver).entered();
    tracing::debug!(queue = %transport.queue().name(), "dispatcher started");

    loop {
        match transport.wait_readable() {
            Ok(Readiness::Readable) => match transport.forward_pending() {
                Ok(forwarded) => {
                    tracing::trace!(forwarded, "dispatched queued samples");
                    if let Ok(depth) = transport.queue().pending() {
                        record_queue_depth(transport.topic(), depth);
                    }
                }
                Err(Error::QueueClosed) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "queue receive failed, stopping");
                    break;
                }
            },
            Ok(Readiness::Closed) => break,
            Err(e) => {
                tracing::warn!(error = %e, "dispatcher wait failed, stopping");
                break;
            }
        }
    }

    tracing::debug!("dispatcher stopped");
}
