//! Result delivery for program invocations.

use plexus_core::error::Error;
use plexus_core::types::Value;

/// Receives the outcome of one invocation.
///
/// Every declared output gets exactly one `succeed` or `fail`, then `end`
/// is called once. `abort` precedes the failures when the run itself fails.
pub trait ResultHandler: Send {
    fn succeed(&mut self, name: &str, value: Value);
    fn fail(&mut self, name: &str, error: Error);
    fn abort(&mut self, _error: &Error) {}
    fn end(&mut self);
}

#[derive(Debug, Clone)]
pub enum HandlerEvent {
    Succeeded(String, Value),
    Failed(String, Error),
    Aborted(Error),
    Ended,
}

/// Records every callback in order.
#[derive(Debug, Default)]
pub struct CollectingHandler {
    pub events: Vec<HandlerEvent>,
}

impl CollectingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.events.iter().find_map(|e| match e {
            HandlerEvent::Succeeded(n, v) if n == name => Some(v),
            _ => None,
        })
    }

    pub fn error(&self, name: &str) -> Option<&Error> {
        self.events.iter().find_map(|e| match e {
            HandlerEvent::Failed(n, err) if n == name => Some(err),
            _ => None,
        })
    }

    /// Number of succeed/fail calls.
    pub fn terminal_calls(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, HandlerEvent::Succeeded(..) | HandlerEvent::Failed(..)))
            .count()
    }

    pub fn ended(&self) -> bool {
        matches!(self.events.last(), Some(HandlerEvent::Ended))
    }

    pub fn aborted(&self) -> Option<&Error> {
        self.events.iter().find_map(|e| match e {
            HandlerEvent::Aborted(err) => Some(err),
            _ => None,
        })
    }
}

impl ResultHandler for CollectingHandler {
    fn succeed(&mut self, name: &str, value: Value) {
        self.events.push(HandlerEvent::Succeeded(name.to_string(), value));
    }

    fn fail(&mut self, name: &str, error: Error) {
        self.events.push(HandlerEvent::Failed(name.to_string(), error));
    }

    fn abort(&mut self, error: &Error) {
        self.events.push(HandlerEvent::Aborted(error.clone()));
    }

    fn end(&mut self) {
        self.events.push(HandlerEvent::Ended);
    }
}
