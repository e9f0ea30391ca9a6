//! # Notifications
//!
//! Order notifications (confirmation, payment receipt) go to an external
//! [`Notifier`]. Delivery is fire-and-forget: it runs on a spawned task and
//! a failure is logged, never propagated to the state transition that
//! triggered it.

use crate::error::CheckoutResult;
use crate::order::Order;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to the order
#[derive(Debug, Clone)]
pub enum Notification {
    /// Order placed (`pending → confirmed`)
    Confirmed(Order),
    /// Payment accepted (`confirmed → paid`)
    Paid(Order),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Confirmed(_) => "order_confirmed",
            Notification::Paid(_) => "order_paid",
        }
    }

    pub fn order(&self) -> &Order {
        match self {
            Notification::Confirmed(order) | Notification::Paid(order) => order,
        }
    }
}

/// Notification collaborator (email, SMS, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> CheckoutResult<()>;
}

/// Notifier that only writes a log line
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, notification: Notification) -> CheckoutResult<()> {
        let order = notification.order();
        info!(
            kind = notification.kind(),
            order_number = order.order_number(),
            user_id = order.user_id(),
            total = order.amount_due(),
            "Order notification"
        );
        Ok(())
    }
}

/// Hand a notification to the notifier on a background task
pub(crate) fn dispatch(notifier: &Arc<dyn Notifier>, notification: Notification) {
    let notifier = Arc::clone(notifier);
    tokio::spawn(async move {
        let kind = notification.kind();
        let order_number = notification.order().order_number().to_string();
        if let Err(e) = notifier.notify(notification).await {
            warn!(kind, %order_number, error = %e, "Notification delivery failed");
        }
    });
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::CheckoutError;
    use std::sync::Mutex;

    /// Records every notification it receives
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub(crate) sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub(crate) fn kinds(&self) -> Vec<String> {
            self.sent.lock().unwrap().iter().map(|(k, _)| k.clone()).collect()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: Notification) -> CheckoutResult<()> {
            self.sent.lock().unwrap().push((
                notification.kind().to_string(),
                notification.order().id().to_string(),
            ));
            Ok(())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _notification: Notification) -> CheckoutResult<()> {
            Err(CheckoutError::Internal("smtp down".into()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_delivers_in_background() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifier: Arc<dyn Notifier> = recorder.clone();
        let order = Order::new_draft("alice", Default::default());

        dispatch(&notifier, Notification::Confirmed(order));
        tokio::task::yield_now().await;

        assert_eq!(recorder.kinds(), vec!["order_confirmed".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let notifier: Arc<dyn Notifier> = Arc::new(FailingNotifier);
        dispatch(
            &notifier,
            Notification::Paid(Order::new_draft("alice", Default::default())),
        );
        tokio::task::yield_now().await;
    }
}
