//! Realtime-safe delivery of engine events to client code
//!
//! The render thread may never run user callbacks: a completion handler
//! that blocks, allocates, or re-enters the context would blow the audio
//! deadline. Instead the render thread pushes events into an MPSC channel
//! and the client drains them from whatever thread it likes via
//! [`Context::drain_events`](crate::context::Context::drain_events).

use crate::node::NodeId;
use crossbeam_channel::{unbounded, Receiver, Sender};

/// A completion handler supplied with `play_with`.
pub type FinishedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Events produced on the render thread.
pub enum EngineEvent {
    /// A scheduled source reached its end and moved to the finished state.
    SourceFinished {
        node: NodeId,
        callback: Option<FinishedCallback>,
    },
}

pub type EventSender = Sender<EngineEvent>;
pub type EventReceiver = Receiver<EngineEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_events_cross_the_channel() {
        let (tx, rx) = event_channel();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = Arc::clone(&fired);

        tx.send(EngineEvent::SourceFinished {
            node: 3,
            callback: Some(Box::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            })),
        })
        .unwrap();

        match rx.try_recv().unwrap() {
            EngineEvent::SourceFinished { node, callback } => {
                assert_eq!(node, 3);
                callback.unwrap()();
            }
        }
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
