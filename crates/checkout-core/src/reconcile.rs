//! # Reconciliation Coordinator
//!
//! Webhooks and verification polls are two producers of payment
//! confirmations for the same order. Both feed [`apply_payment_event`],
//! which performs check-then-act under the order's lock, so whichever
//! arrives first marks the order paid and the other observes
//! `AlreadyApplied`.
//!
//! Problems that may mean money moved (amount or currency mismatch, payment
//! for an order that cannot accept it) are recorded on the order as
//! [`ReconciliationIssue`]s for manual review. A provider decline is recorded
//! too but leaves the order open for another attempt; an in-flight payment
//! changes nothing.
//!
//! [`apply_payment_event`]: ReconciliationCoordinator::apply_payment_event

use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::PaymentEvent;
use crate::lifecycle::OrderStore;
use crate::money::Currency;
use crate::notify::{self, Notification, Notifier};
use crate::order::{IssueKind, OrderStatus, PaymentRecord, ReconciliationIssue};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Why an event did not mark the order paid
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Paid amount is outside tolerance of the order total
    AmountMismatch { expected: i64, received: i64 },
    /// Paid in a different currency than the order
    CurrencyMismatch { expected: Currency, received: Currency },
    /// Order is not in a state that accepts payment
    NotPayable { status: OrderStatus },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::AmountMismatch { expected, received } => {
                write!(f, "amount mismatch: expected {}, received {}", expected, received)
            }
            RejectReason::CurrencyMismatch { expected, received } => {
                write!(f, "currency mismatch: expected {}, received {}", expected.code(), received.code())
            }
            RejectReason::NotPayable { status } => write!(f, "order is {}", status),
        }
    }
}

/// Result of applying one payment event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Order moved `confirmed → paid`
    Applied,
    /// Order was already paid; nothing changed
    AlreadyApplied,
    /// Payment still in flight at the provider; nothing changed
    Pending,
    /// Provider declined the payment; the order stays open
    Declined { status: String },
    /// Event refused; the order is flagged for manual review
    Rejected(RejectReason),
}

/// Single idempotent consumer of payment events
pub struct ReconciliationCoordinator {
    orders: Arc<OrderStore>,
    notifier: Arc<dyn Notifier>,
}

impl ReconciliationCoordinator {
    pub fn new(orders: Arc<OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { orders, notifier }
    }

    /// Apply a payment confirmation to an order
    #[instrument(skip(self, event), fields(provider = %event.provider, channel = %event.channel, event_id = %event.provider_event_id))]
    pub async fn apply_payment_event(&self, order_id: &str, event: PaymentEvent) -> CheckoutResult<ApplyOutcome> {
        let handle = self.orders.require(order_id).await?;
        let mut order = handle.lock().await;

        if order.is_paid() {
            debug!(order_number = order.order_number(), "Payment already applied");
            return Ok(ApplyOutcome::AlreadyApplied);
        }

        if event.is_pending {
            debug!(order_number = order.order_number(), status = %event.status, "Payment still pending");
            return Ok(ApplyOutcome::Pending);
        }

        if event.is_declined() {
            info!(order_number = order.order_number(), status = %event.status, "Payment declined");
            let detail = format!("provider declined with status {}", event.status);
            let issue = ReconciliationIssue::new(IssueKind::Declined, &order, &event, detail);
            order.flag(issue);
            return Ok(ApplyOutcome::Declined { status: event.status });
        }

        let rejection = if order.status() != OrderStatus::Confirmed {
            Some((
                IssueKind::NotPayable,
                RejectReason::NotPayable {
                    status: order.status(),
                },
            ))
        } else {
            match event.currency {
                Some(received) if received != order.currency() => Some((
                    IssueKind::CurrencyMismatch,
                    RejectReason::CurrencyMismatch {
                        expected: order.currency(),
                        received,
                    },
                )),
                _ => None,
            }
        };

        if let Some((kind, reason)) = rejection {
            warn!(order_number = order.order_number(), %reason, "Payment event rejected");
            let issue = ReconciliationIssue::new(kind, &order, &event, reason.to_string());
            order.flag(issue);
            return Ok(ApplyOutcome::Rejected(reason));
        }

        match order.mark_paid(PaymentRecord::from(&event)) {
            Ok(()) => {
                info!(
                    order_number = order.order_number(),
                    amount = event.amount,
                    "Order paid"
                );
                notify::dispatch(&self.notifier, Notification::Paid(order.clone()));
                Ok(ApplyOutcome::Applied)
            }
            Err(CheckoutError::AmountMismatch { expected, received }) => {
                let reason = RejectReason::AmountMismatch { expected, received };
                warn!(order_number = order.order_number(), %reason, "Payment needs manual review");
                let issue = ReconciliationIssue::new(IssueKind::AmountMismatch, &order, &event, reason.to_string());
                order.flag(issue);
                Ok(ApplyOutcome::Rejected(reason))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::CartStore;
    use crate::catalog::{CatalogProduct, ProductCatalog};
    use crate::coupon::CouponBook;
    use crate::gateway::PaymentChannel;
    use crate::identity::Identity;
    use crate::lifecycle::OrderLifecycle;
    use crate::notify::tests::RecordingNotifier;
    use crate::order::tests::address;
    use crate::order::{Order, ShippingAddress};
    use crate::pricing::{PricingConfig, PricingEngine};
    use chrono::Utc;

    struct Fixture {
        lifecycle: Arc<OrderLifecycle>,
        coordinator: Arc<ReconciliationCoordinator>,
        notifier: Arc<RecordingNotifier>,
    }

    /// A confirmed $52.39 order for alice
    async fn confirmed_order() -> (Fixture, Order) {
        let catalog = ProductCatalog::new().with_product(CatalogProduct::new("p1", "Widget", 2000, 50));
        let engine = PricingEngine::new(PricingConfig {
            free_shipping_threshold: 10_000,
            ..PricingConfig::default()
        });
        let carts = Arc::new(CartStore::new(Arc::new(catalog), CouponBook::new(), engine));
        let orders = Arc::new(OrderStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let lifecycle = Arc::new(OrderLifecycle::new(Arc::clone(&carts), Arc::clone(&orders), notifier.clone()));
        let coordinator = Arc::new(ReconciliationCoordinator::new(orders, notifier.clone()));

        carts.add_line(&Identity::user("alice"), "p1", None, 2).await.unwrap();
        lifecycle
            .save_shipping_address("alice", ShippingAddress { state: None, ..address() })
            .await
            .unwrap();
        let order = lifecycle.place_order("alice", None).await.unwrap();
        assert_eq!(order.amount_due(), 5239);

        (
            Fixture {
                lifecycle,
                coordinator,
                notifier,
            },
            order,
        )
    }

    fn event(amount: i64, channel: PaymentChannel) -> PaymentEvent {
        PaymentEvent {
            provider: "paymob".into(),
            provider_event_id: "txn-42".into(),
            external_order_id: "pm-1".into(),
            transaction_id: Some("txn-42".into()),
            is_paid: true,
            is_pending: false,
            amount,
            currency: Some(Currency::USD),
            status: "success".into(),
            raw_payload: serde_json::json!({"id": 42}),
            channel,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_applied_then_already_applied() {
        let (f, order) = confirmed_order().await;

        let first = f
            .coordinator
            .apply_payment_event(order.id(), event(5239, PaymentChannel::Webhook))
            .await
            .unwrap();
        assert_eq!(first, ApplyOutcome::Applied);
        let paid = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        let paid_at = paid.paid_at();

        let second = f
            .coordinator
            .apply_payment_event(order.id(), event(5239, PaymentChannel::Poll))
            .await
            .unwrap();
        assert_eq!(second, ApplyOutcome::AlreadyApplied);

        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.status(), OrderStatus::Paid);
        assert_eq!(after.paid_at(), paid_at);
        assert_eq!(after.payment_result().unwrap().channel, PaymentChannel::Webhook);

        tokio::task::yield_now().await;
        let paid_notices = f.notifier.kinds().iter().filter(|k| *k == "order_paid").count();
        assert_eq!(paid_notices, 1);
    }

    #[tokio::test]
    async fn test_amount_mismatch_stays_confirmed_and_flags() {
        let (f, order) = confirmed_order().await;

        let outcome = f
            .coordinator
            .apply_payment_event(order.id(), event(1000, PaymentChannel::Webhook))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Rejected(RejectReason::AmountMismatch {
                expected: 5239,
                received: 1000
            })
        );

        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.status(), OrderStatus::Confirmed);
        assert!(!after.is_paid());
        assert!(after.needs_manual_review());
        assert_eq!(after.reconciliation_issues()[0].kind, IssueKind::AmountMismatch);
    }

    #[tokio::test]
    async fn test_one_cent_tolerance() {
        let (f, order) = confirmed_order().await;
        let outcome = f
            .coordinator
            .apply_payment_event(order.id(), event(5240, PaymentChannel::Poll))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_pending_event_changes_nothing() {
        let (f, order) = confirmed_order().await;
        let mut pending = event(0, PaymentChannel::Webhook);
        pending.is_paid = false;
        pending.is_pending = true;
        pending.status = "pending".into();

        let outcome = f.coordinator.apply_payment_event(order.id(), pending).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Pending);

        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.status(), OrderStatus::Confirmed);
        assert!(after.reconciliation_issues().is_empty());
        assert!(!after.needs_manual_review());

        let outcome = f
            .coordinator
            .apply_payment_event(order.id(), event(5239, PaymentChannel::Webhook))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_decline_is_recorded_without_manual_review() {
        let (f, order) = confirmed_order().await;
        let mut declined = event(5239, PaymentChannel::Webhook);
        declined.is_paid = false;
        declined.status = "DENIED".into();

        let outcome = f.coordinator.apply_payment_event(order.id(), declined.clone()).await.unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Declined {
                status: "DENIED".into()
            }
        );
        // Redelivery of the same event is not recorded twice
        f.coordinator.apply_payment_event(order.id(), declined).await.unwrap();

        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.status(), OrderStatus::Confirmed);
        assert_eq!(after.reconciliation_issues().len(), 1);
        assert_eq!(after.reconciliation_issues()[0].kind, IssueKind::Declined);
        assert!(!after.needs_manual_review());

        let retry = f
            .coordinator
            .apply_payment_event(order.id(), event(5239, PaymentChannel::Poll))
            .await
            .unwrap();
        assert_eq!(retry, ApplyOutcome::Applied);
    }

    #[tokio::test]
    async fn test_payment_for_cancelled_order_is_flagged() {
        let (f, order) = confirmed_order().await;
        f.lifecycle.cancel("alice", order.id(), false, None).await.unwrap();

        let outcome = f
            .coordinator
            .apply_payment_event(order.id(), event(5239, PaymentChannel::Webhook))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ApplyOutcome::Rejected(RejectReason::NotPayable {
                status: OrderStatus::Cancelled
            })
        );
        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.reconciliation_issues()[0].kind, IssueKind::NotPayable);
        assert!(after.needs_manual_review());
    }

    #[tokio::test]
    async fn test_currency_mismatch_rejected() {
        let (f, order) = confirmed_order().await;
        let mut egp = event(5239, PaymentChannel::Webhook);
        egp.currency = Some(Currency::EGP);

        let outcome = f.coordinator.apply_payment_event(order.id(), egp).await.unwrap();
        assert!(matches!(
            outcome,
            ApplyOutcome::Rejected(RejectReason::CurrencyMismatch { .. })
        ));
        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.reconciliation_issues()[0].kind, IssueKind::CurrencyMismatch);
        assert!(after.needs_manual_review());
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let (f, _) = confirmed_order().await;
        let err = f
            .coordinator
            .apply_payment_event("missing", event(1, PaymentChannel::Manual))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_webhook_and_poll_race_converge() {
        let (f, order) = confirmed_order().await;

        let webhook = {
            let coordinator = Arc::clone(&f.coordinator);
            let id = order.id().to_string();
            tokio::spawn(async move {
                coordinator
                    .apply_payment_event(&id, event(5239, PaymentChannel::Webhook))
                    .await
            })
        };
        let poll = {
            let coordinator = Arc::clone(&f.coordinator);
            let id = order.id().to_string();
            tokio::spawn(async move {
                coordinator
                    .apply_payment_event(&id, event(5239, PaymentChannel::Poll))
                    .await
            })
        };

        let mut outcomes = vec![webhook.await.unwrap().unwrap(), poll.await.unwrap().unwrap()];
        outcomes.sort_by_key(|o| matches!(o, ApplyOutcome::AlreadyApplied));
        assert_eq!(outcomes, vec![ApplyOutcome::Applied, ApplyOutcome::AlreadyApplied]);

        let after = f.lifecycle.get_order("alice", order.id(), false).await.unwrap();
        assert_eq!(after.status(), OrderStatus::Paid);
        assert!(after.payment_result().is_some());
        assert!(after.reconciliation_issues().is_empty());
    }
}
