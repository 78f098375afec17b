//! Real-time fan-out of input blocks into every registered consumer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::error;

use crate::StreamError;
use crate::dataflow::{ConsumerId, ConsumerKind, ConsumerPort, DataflowControl, SAMPLE_BYTES};
use crate::ring::SharedRingBuffer;

/// Immutable list of ports in service order.
pub type PortList = Arc<Vec<Arc<ConsumerPort>>>;

/// Registry of encoder and recorder ports fed from the audio callback.
///
/// Consumers are serviced in registration order, encoders and recorders
/// interleaved as they were added. The registry is published as an immutable
/// snapshot: [`process`](Self::process) clones the current list under a short
/// lock and services it without holding any lock, so registration and control
/// lookups never queue behind a block that is waiting on backpressure.
pub struct FanOut {
    ports: Mutex<PortList>,
    update: Mutex<()>,
    next_id: AtomicU32,
    backpressure_quantum: Duration,
}

impl FanOut {
    /// Create an empty fan-out.
    pub fn new(backpressure_quantum: Duration) -> Self {
        Self {
            ports: Mutex::new(Arc::new(Vec::new())),
            update: Mutex::new(()),
            next_id: AtomicU32::new(1),
            backpressure_quantum,
        }
    }

    /// Register a consumer whose rings hold `capacity_frames` samples each.
    ///
    /// Rings are allocated before the registry is touched.
    pub fn register(
        &self,
        kind: ConsumerKind,
        name: impl Into<String>,
        capacity_frames: usize,
        shared: bool,
    ) -> Result<Arc<ConsumerPort>, StreamError> {
        let bytes = capacity_frames * SAMPLE_BYTES;
        let (left, right) = if shared {
            (
                SharedRingBuffer::new_shared(bytes).map_err(StreamError::Allocation)?,
                SharedRingBuffer::new_shared(bytes).map_err(StreamError::Allocation)?,
            )
        } else {
            (SharedRingBuffer::new_local(bytes), SharedRingBuffer::new_local(bytes))
        };
        let id = ConsumerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let port = Arc::new(ConsumerPort::new(id, kind, name.into(), left, right));

        let port_for_list = port.clone();
        self.modify(move |list| list.push(port_for_list));
        Ok(port)
    }

    /// Remove a consumer. Returns the port if it was registered.
    ///
    /// The port is switched off so a block still holding the previous
    /// snapshot stops waiting on it.
    pub fn unregister(&self, id: ConsumerId) -> Option<Arc<ConsumerPort>> {
        let mut removed = None;
        self.modify(|list| {
            if let Some(pos) = list.iter().position(|port| port.id() == id) {
                removed = Some(list.remove(pos));
            }
        });
        let port = removed?;
        port.force_off();
        port.notify_space();
        Some(port)
    }

    /// Build the next list outside the snapshot lock, then swap it in.
    fn modify(&self, edit: impl FnOnce(&mut Vec<Arc<ConsumerPort>>)) {
        let _writer = self.update.lock();
        let mut next = Vec::clone(&self.snapshot());
        edit(&mut next);
        let previous = std::mem::replace(&mut *self.ports.lock(), Arc::new(next));
        drop(previous);
    }

    /// Current registry snapshot in service order.
    pub fn snapshot(&self) -> PortList {
        self.ports.lock().clone()
    }

    /// Look up a registered consumer.
    pub fn consumer(&self, id: ConsumerId) -> Option<Arc<ConsumerPort>> {
        self.snapshot().iter().find(|port| port.id() == id).cloned()
    }

    /// Number of registered consumers.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether no consumer is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Distribute one block. `left` and `right` must hold the same number of
    /// frames. `running` is polled while waiting on a full ring.
    pub fn process(
        &self,
        left: &[f32],
        right: &[f32],
        running: impl Fn() -> bool + Copy,
    ) -> Result<usize, StreamError> {
        if left.len() != right.len() {
            return Err(StreamError::ChannelMismatch {
                left: left.len(),
                right: right.len(),
            });
        }
        let frames = left.len();
        if frames == 0 {
            return Ok(0);
        }
        let left_bytes: &[u8] = bytemuck::cast_slice(left);
        let right_bytes: &[u8] = bytemuck::cast_slice(right);
        let ports = self.snapshot();
        for port in ports.iter() {
            self.service(port, left_bytes, right_bytes, running);
        }
        Ok(frames)
    }

    fn service(
        &self,
        port: &ConsumerPort,
        left: &[u8],
        right: &[u8],
        running: impl Fn() -> bool,
    ) {
        let raw = port.raw_state();
        match DataflowControl::from_raw(raw) {
            Some(DataflowControl::Off) => {}
            Some(DataflowControl::On) => {
                if !port.wait_for_space(right.len(), self.backpressure_quantum, running) {
                    // State changed or session stopping; the next block handles it.
                    return;
                }
                let timestamp = crate::ring::monotonic_timestamp_ns();
                let pushed_left = port.left().push(left, Some(timestamp));
                let pushed_right = port.right().push(right, Some(timestamp));
                if pushed_left < left.len() || pushed_right < right.len() {
                    error!(
                        consumer = port.id().get(),
                        requested = left.len(),
                        left = pushed_left,
                        right = pushed_right,
                        "short ring write, samples dropped"
                    );
                }
                port.record_written(pushed_left.min(pushed_right) / SAMPLE_BYTES);
            }
            Some(DataflowControl::Flush) => {
                let dropped = port.left().reset().max(port.right().reset());
                port.record_flushed(dropped / SAMPLE_BYTES);
                port.force_off();
            }
            None => {
                error!(consumer = port.id().get(), state = raw, "unhandled dataflow state");
            }
        }
    }
}
