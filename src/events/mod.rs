//! Event dispatch.
//!
//! Scenes raise named events through the `EventBus`. Observers are invoked
//! in registration order; an observer that fails or panics is logged and
//! skipped, and delivery continues with the next one.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;

use crate::frame::Frame;
use crate::scene::ResultContext;
use crate::TimestampMs;

pub mod observers;

pub use observers::{JsonLinesObserver, LogObserver};

/// A result screen has settled and been analysed.
pub const EVENT_RESULT_DETAIL: &str = "on_result_detail";
/// A new per-player result context is available.
pub const EVENT_INDIVIDUAL_RESULT: &str = "on_game_individual_result";

/// Payload handed to every observer.
#[derive(Clone)]
pub struct EventContext {
    pub scene: String,
    pub timestamp_ms: TimestampMs,
    pub frame_width: u32,
    pub frame_height: u32,
    pub result: Arc<ResultContext>,
    /// The frame the result was extracted from, after offset correction.
    pub frame: Arc<Frame>,
}

impl fmt::Debug for EventContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("scene", &self.scene)
            .field("timestamp_ms", &self.timestamp_ms)
            .field("frame_width", &self.frame_width)
            .field("frame_height", &self.frame_height)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

pub trait Observer: Send {
    fn name(&self) -> &str;

    fn on_event(&mut self, event: &str, ctx: &EventContext) -> Result<()>;
}

/// Adapts a closure registered with [`EventBus::on`].
struct FnObserver<F> {
    name: String,
    handler: F,
}

impl<F> Observer for FnObserver<F>
where
    F: FnMut(&EventContext) -> Result<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_event(&mut self, _event: &str, ctx: &EventContext) -> Result<()> {
        (self.handler)(ctx)
    }
}

struct Subscription {
    /// `None` subscribes to every event.
    event: Option<String>,
    observer: Box<dyn Observer>,
}

impl Subscription {
    fn wants(&self, event: &str) -> bool {
        self.event.as_deref().map_or(true, |name| name == event)
    }
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    failures: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event.
    pub fn on<F>(&mut self, event: &str, handler: F)
    where
        F: FnMut(&EventContext) -> Result<()> + Send + 'static,
    {
        let name = format!("handler#{}:{}", self.subscriptions.len(), event);
        self.subscribe(event, FnObserver { name, handler });
    }

    /// Register an observer for one event.
    pub fn subscribe<O: Observer + 'static>(&mut self, event: &str, observer: O) {
        self.subscriptions.push(Subscription {
            event: Some(event.to_string()),
            observer: Box::new(observer),
        });
    }

    /// Register an observer for every event.
    pub fn register<O: Observer + 'static>(&mut self, observer: O) {
        self.subscriptions.push(Subscription {
            event: None,
            observer: Box::new(observer),
        });
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Observer failures and panics since construction.
    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Deliver `event` to every interested observer in registration order.
    /// Returns the number of observers that handled it without error.
    pub fn emit(&mut self, event: &str, ctx: &EventContext) -> usize {
        let mut delivered = 0;
        for sub in self.subscriptions.iter_mut().filter(|sub| sub.wants(event)) {
            let observer = &mut sub.observer;
            match panic::catch_unwind(AssertUnwindSafe(|| observer.on_event(event, ctx))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    self.failures += 1;
                    log::error!("observer {} failed on {}: {:#}", observer.name(), event, e);
                }
                Err(payload) => {
                    self.failures += 1;
                    log::error!(
                        "observer {} panicked on {}: {}",
                        observer.name(),
                        event,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        delivered
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use anyhow::anyhow;
    use std::sync::Mutex;

    #[test]
    fn delivery_follows_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        for id in 0..3 {
            let seen = Arc::clone(&seen);
            bus.on(EVENT_RESULT_DETAIL, move |_| {
                seen.lock().unwrap().push(id);
                Ok(())
            });
        }

        assert_eq!(bus.emit(EVENT_RESULT_DETAIL, &context(ResultContext::default())), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn failing_and_panicking_observers_do_not_block_others() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.on(EVENT_INDIVIDUAL_RESULT, |_| Err(anyhow!("disk full")));
        bus.on(EVENT_INDIVIDUAL_RESULT, |_| panic!("observer bug"));
        let tail = Arc::clone(&seen);
        bus.on(EVENT_INDIVIDUAL_RESULT, move |ctx| {
            tail.lock().unwrap().push(ctx.timestamp_ms);
            Ok(())
        });

        let delivered = bus.emit(EVENT_INDIVIDUAL_RESULT, &context(ResultContext::default()));
        assert_eq!(delivered, 1);
        assert_eq!(bus.failures(), 2);
        assert_eq!(*seen.lock().unwrap(), vec![1_000]);
    }

    #[test]
    fn handlers_only_see_their_event() {
        let count = Arc::new(Mutex::new(0));
        let mut bus = EventBus::new();
        let c = Arc::clone(&count);
        bus.on(EVENT_RESULT_DETAIL, move |_| {
            *c.lock().unwrap() += 1;
            Ok(())
        });

        assert_eq!(bus.emit(EVENT_INDIVIDUAL_RESULT, &context(ResultContext::default())), 0);
        assert_eq!(*count.lock().unwrap(), 0);
    }
}
