//! Activation dispatcher contract.
//!
//! The engine hands every [`ScheduledActivation`] to a dispatcher in
//! fire-at order. Hardware timing at the fire instant belongs to the
//! dispatcher; hand-off must not block the pipeline.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::info;
use visifruit::activation::ScheduledActivation;

use crate::error::DispatchError;

/// Receives scheduled activations.
pub trait ActivationDispatcher: Send + Sync {
    /// Hand off one activation without blocking.
    fn dispatch(&self, activation: &ScheduledActivation) -> Result<(), DispatchError>;
}

/// Logs every activation; used when no hardware dispatcher is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

impl ActivationDispatcher for LogDispatcher {
    fn dispatch(&self, a: &ScheduledActivation) -> Result<(), DispatchError> {
        info!(
            actuator = %a.actuator,
            fire_at_us = a.fire_at_us,
            delay_ms = a.delay_ms,
            duration_ms = a.duration_ms,
            intensity_pct = a.intensity_pct,
            members = a.cluster_member_count,
            frame = a.frame_sequence,
            "Activation scheduled"
        );
        Ok(())
    }
}

/// Forwards activations over a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<ScheduledActivation>,
}

impl ChannelDispatcher {
    /// Dispatcher plus the receiving end for the actuator driver.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ScheduledActivation>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ActivationDispatcher for ChannelDispatcher {
    fn dispatch(&self, activation: &ScheduledActivation) -> Result<(), DispatchError> {
        self.tx
            .try_send(activation.clone())
            .map_err(|e| match e {
                TrySendError::Full(_) => DispatchError::Backpressure {
                    capacity: self.tx.max_capacity(),
                },
                TrySendError::Closed(_) => DispatchError::Closed,
            })
    }
}

impl<D: ActivationDispatcher + ?Sized> ActivationDispatcher for std::sync::Arc<D> {
    fn dispatch(&self, activation: &ScheduledActivation) -> Result<(), DispatchError> {
        (**self).dispatch(activation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use visifruit::activation::ActuatorTarget;

    fn activation() -> ScheduledActivation {
        ScheduledActivation {
            actuator: ActuatorTarget::Zone("L1".into()),
            fire_at_us: 5_000_000,
            created_at_us: 1_000_000,
            delay_ms: 4_000.0,
            duration_ms: 250.0,
            intensity_pct: 80.0,
            cluster_member_count: 1,
            frame_sequence: 1,
            cluster_id: 0,
            rows: 1,
            columns: 1,
            spatial_factor: 1.0,
            passage_ms: 100.0,
            majority_class: None,
        }
    }

    #[tokio::test]
    async fn channel_delivers_in_order() {
        let (dispatcher, mut rx) = ChannelDispatcher::channel(4);
        let mut second = activation();
        second.fire_at_us += 10;
        dispatcher.dispatch(&activation()).unwrap();
        dispatcher.dispatch(&second).unwrap();
        assert_eq!(rx.recv().await.unwrap().fire_at_us, 5_000_000);
        assert_eq!(rx.recv().await.unwrap().fire_at_us, 5_000_010);
    }

    #[test]
    fn full_channel_reports_backpressure() {
        let (dispatcher, _rx) = ChannelDispatcher::channel(1);
        dispatcher.dispatch(&activation()).unwrap();
        assert_eq!(
            dispatcher.dispatch(&activation()),
            Err(DispatchError::Backpressure { capacity: 1 })
        );
    }

    #[test]
    fn dropped_receiver_is_closed() {
        let (dispatcher, rx) = ChannelDispatcher::channel(1);
        drop(rx);
        assert_eq!(dispatcher.dispatch(&activation()), Err(DispatchError::Closed));
    }

    #[test]
    fn log_dispatcher_accepts_everything() {
        assert!(LogDispatcher.dispatch(&activation()).is_ok());
    }
}
