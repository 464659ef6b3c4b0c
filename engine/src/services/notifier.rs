use super::bus::{EventBus, EventSubscription};
use std::sync::Arc;
use tracing::info;

/// Local notification capability
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title = %title, body = %body, "Local notification");
    }
}

/// A notification as delivered to remote listeners
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, utoipa::ToSchema)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Logs, then fans notifications out to WebSocket clients
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    bus: EventBus<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        Self {
            bus: EventBus::new(capacity),
        }
    }

    pub fn subscribe(&self) -> EventSubscription<Notification> {
        self.bus.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, title: &str, body: &str) {
        TracingNotifier.notify(title, body);
        self.bus.publish(Notification {
            title: title.to_string(),
            body: body.to_string(),
        });
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self, title: &str, body: &str) {
        (**self).notify(title, body)
    }
}
