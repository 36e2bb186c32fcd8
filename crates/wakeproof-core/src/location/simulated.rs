//! Deterministic, scripted location source.
//!
//! Stands in for the platform API in tests and in CLI replays:
//! - one-shot responses are served from a FIFO script, then from an
//!   optional repeating response
//! - every one-shot request's options are recorded for inspection
//! - stream updates are pushed by the test/replay driver with [`SimulatedSource::emit`]

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{
    Fix, LocationError, LocationOptions, LocationSource, LocationUpdate, Subscription,
    SubscriptionHandle,
};

#[derive(Default)]
struct ScriptState {
    responses: VecDeque<LocationUpdate>,
    repeat: Option<LocationUpdate>,
    requests: Vec<LocationOptions>,
    subscriptions: HashMap<u64, mpsc::UnboundedSender<LocationUpdate>>,
    subscribe_options: Vec<LocationOptions>,
    next_handle: u64,
    latency: Option<Duration>,
}

/// Scripted [`LocationSource`].
pub struct SimulatedSource {
    supported: bool,
    state: Mutex<ScriptState>,
}

impl SimulatedSource {
    pub fn new() -> Self {
        Self {
            supported: true,
            state: Mutex::new(ScriptState::default()),
        }
    }

    /// A platform without any location capability.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            state: Mutex::new(ScriptState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the next one-shot response.
    pub fn push_response(&self, response: LocationUpdate) {
        self.state().responses.push_back(response);
    }

    /// Response served once the queue is empty.
    pub fn always(&self, response: LocationUpdate) {
        self.state().repeat = Some(response);
    }

    /// Delay applied to every one-shot response.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    /// Options of every one-shot request made so far, in call order.
    pub fn requests(&self) -> Vec<LocationOptions> {
        self.state().requests.clone()
    }

    /// Options of every subscription opened so far.
    pub fn subscribe_requests(&self) -> Vec<LocationOptions> {
        self.state().subscribe_options.clone()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Deliver a stream update to every active subscription.
    ///
    /// Returns how many subscriptions received it.
    pub fn emit(&self, update: LocationUpdate) -> usize {
        let mut state = self.state();
        state
            .subscriptions
            .retain(|_, sender| sender.send(update.clone()).is_ok());
        state.subscriptions.len()
    }

    pub fn emit_fix(&self, fix: Fix) -> usize {
        self.emit(Ok(fix))
    }

    /// Close every stream, as a platform does when location services go away.
    pub fn close_streams(&self) {
        self.state().subscriptions.clear();
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocationSource for SimulatedSource {
    async fn request_once(&self, options: &LocationOptions) -> Result<Fix, LocationError> {
        let (response, latency) = {
            let mut state = self.state();
            state.requests.push(*options);
            if !self.supported {
                return Err(LocationError::Unsupported);
            }
            let response = state
                .responses
                .pop_front()
                .or_else(|| state.repeat.clone())
                .unwrap_or_else(|| {
                    Err(LocationError::PositionUnavailable(
                        "no scripted response".into(),
                    ))
                });
            (response, state.latency)
        };

        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        response
    }

    fn subscribe(&self, options: &LocationOptions) -> Result<Subscription, LocationError> {
        if !self.supported {
            return Err(LocationError::Unsupported);
        }
        let mut state = self.state();
        state.subscribe_options.push(*options);
        state.next_handle += 1;
        let handle = state.next_handle;
        let (tx, rx) = mpsc::unbounded_channel();
        state.subscriptions.insert(handle, tx);
        Ok(Subscription {
            handle: SubscriptionHandle(handle),
            updates: rx,
        })
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.state().subscriptions.remove(&handle.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_then_repeat_then_unavailable() {
        let source = SimulatedSource::new();
        let options = LocationOptions {
            high_accuracy: true,
            timeout_ms: 1_000,
            maximum_age_ms: 0,
        };
        source.push_response(Ok(Fix::new(1.0, 2.0, 5.0, 10)));
        assert_eq!(source.request_once(&options).await.unwrap().latitude, 1.0);
        assert!(matches!(
            source.request_once(&options).await,
            Err(LocationError::PositionUnavailable(_))
        ));

        source.always(Err(LocationError::Timeout));
        assert_eq!(
            source.request_once(&options).await,
            Err(LocationError::Timeout)
        );
        assert_eq!(source.requests().len(), 3);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let source = SimulatedSource::new();
        let options = LocationOptions {
            high_accuracy: true,
            timeout_ms: 1_000,
            maximum_age_ms: 0,
        };
        let mut sub = source.subscribe(&options).unwrap();
        assert_eq!(source.emit_fix(Fix::new(0.0, 0.0, 1.0, 1)), 1);
        assert!(sub.updates.try_recv().is_ok());

        source.unsubscribe(sub.handle);
        assert_eq!(source.emit_fix(Fix::new(0.0, 0.0, 1.0, 2)), 0);
        assert_eq!(source.active_subscriptions(), 0);
    }
}
