//! # Payment Service
//!
//! Ties the gateways to orders and the reconciliation coordinator:
//!
//! - **initiate**: start a provider payment for a confirmed order and
//!   remember the provider-side id
//! - **verify**: bounded poll of the provider, feeding a confirmation to
//!   the coordinator
//! - **handle_callback**: authenticate a provider callback, resolve its
//!   order, and feed it to the coordinator
//! - **ingest_callback**: `handle_callback` with bounded retries for
//!   failures that may clear up (provider outage, order not indexed yet)
//!
//! The order lock is never held across a provider call.

use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::{CallbackHeaders, GatewayRegistry, Initiation, PaymentEvent};
use crate::lifecycle::{authorize, OrderStore};
use crate::notify::Notifier;
use crate::order::{Order, PaymentInfo};
use crate::polling::{poll, PollOutcome, PollPolicy};
use crate::reconcile::{ApplyOutcome, ReconciliationCoordinator, RejectReason};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Provider name recorded for payments taken outside any gateway
pub const MANUAL_PROVIDER: &str = "manual";

/// What a verification poll concluded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerifyOutcome {
    /// This poll marked the order paid
    Paid,
    /// The order was already paid (by a webhook or an earlier poll)
    AlreadyPaid,
    /// Provider answered; payment not complete
    NotYetPaid,
    /// Provider declined the payment; a new attempt may be started
    Declined { status: String },
    /// No definitive answer within the poll bounds
    TimedOut,
    /// Provider reports payment but it could not be applied automatically
    ManualReview { reason: RejectReason },
}

/// Verification result plus the order as it stands afterwards
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    #[serde(flatten)]
    pub outcome: VerifyOutcome,
    pub order: Order,
}

/// What happened to a provider callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Authentic, but carries no payment outcome
    Ignored,
    /// Applied (or refused) against an order
    Processed { order_id: String, outcome: ApplyOutcome },
}

/// How often a callback is reprocessed after a transient failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackRetry {
    /// Total processing attempts, the first included
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after each failure
    pub backoff: Duration,
}

impl Default for CallbackRetry {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Failures a later attempt may get past. An unknown external id is one:
/// the callback can beat `initiate` to the index.
fn worth_retrying(e: &CheckoutError) -> bool {
    e.is_retryable() || matches!(e, CheckoutError::NotFound { entity: "payment", .. })
}

/// Payment operations over all registered gateways
pub struct PaymentService {
    gateways: GatewayRegistry,
    orders: Arc<OrderStore>,
    coordinator: ReconciliationCoordinator,
    policy: PollPolicy,
    callback_retry: CallbackRetry,
}

impl PaymentService {
    pub fn new(gateways: GatewayRegistry, orders: Arc<OrderStore>, notifier: Arc<dyn Notifier>) -> Self {
        let coordinator = ReconciliationCoordinator::new(Arc::clone(&orders), notifier);
        Self {
            gateways,
            orders,
            coordinator,
            policy: PollPolicy::default(),
            callback_retry: CallbackRetry::default(),
        }
    }

    /// Builder: verification poll bounds
    pub fn with_poll_policy(mut self, policy: PollPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Builder: callback reprocessing bounds
    pub fn with_callback_retry(mut self, retry: CallbackRetry) -> Self {
        self.callback_retry = retry;
        self
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn coordinator(&self) -> &ReconciliationCoordinator {
        &self.coordinator
    }

    async fn snapshot(&self, user_id: &str, order_id: &str, is_admin: bool) -> CheckoutResult<Order> {
        let handle = self.orders.require(order_id).await?;
        let order = handle.lock().await;
        authorize(&order, user_id, is_admin)?;
        Ok(order.clone())
    }

    /// Start a provider payment for a confirmed, unpaid order
    #[instrument(skip(self))]
    pub async fn initiate(&self, user_id: &str, order_id: &str, provider: &str) -> CheckoutResult<Initiation> {
        let gateway = self.gateways.require(provider)?;

        let order = self.snapshot(user_id, order_id, false).await?;
        order.ensure_payable()?;
        let method_provider = order.payment_method().and_then(|m| m.provider());
        if method_provider != Some(provider) {
            return Err(CheckoutError::Validation(format!(
                "order {} was not set up for {} payment",
                order.order_number(),
                provider
            )));
        }

        let initiation = gateway.initiate(&order).await?;

        {
            let handle = self.orders.require(order_id).await?;
            let mut order = handle.lock().await;
            order.attach_payment_info(PaymentInfo {
                provider: provider.to_string(),
                external_order_id: initiation.external_order_id.clone(),
                client_token: initiation.client_token.clone(),
                redirect_url: initiation.redirect_url.clone(),
                initiated_at: Utc::now(),
            })?;
        }
        self.orders
            .index_external(provider, &initiation.external_order_id, order_id)
            .await;

        info!(
            order_number = order.order_number(),
            external_order_id = %initiation.external_order_id,
            "Payment initiated"
        );
        Ok(initiation)
    }

    /// Poll the provider for the order's payment and apply a confirmation
    #[instrument(skip(self))]
    pub async fn verify(&self, user_id: &str, order_id: &str, is_admin: bool) -> CheckoutResult<VerifyReport> {
        let order = self.snapshot(user_id, order_id, is_admin).await?;
        if order.is_paid() {
            return Ok(VerifyReport {
                outcome: VerifyOutcome::AlreadyPaid,
                order,
            });
        }

        let info = order.payment_info().cloned().ok_or_else(|| {
            CheckoutError::Validation(format!(
                "payment for order {} has not been initiated",
                order.order_number()
            ))
        })?;
        let gateway = self.gateways.require(&info.provider)?.as_ref();
        let external_order_id = info.external_order_id.as_str();

        let check = move || gateway.verify(external_order_id);
        let outcome: VerifyOutcome = match poll(&self.policy, &info.provider, check).await {
            PollOutcome::Paid(verification) => {
                let event = PaymentEvent::from_verification(info.provider.clone(), external_order_id, verification);
                self.coordinator.apply_payment_event(order_id, event).await?.into()
            }
            PollOutcome::NotYetPaid => VerifyOutcome::NotYetPaid,
            PollOutcome::TimedOut => {
                warn!(order_number = order.order_number(), "Verification gave no answer in time");
                VerifyOutcome::TimedOut
            }
            // Same path a declining webhook takes, so both channels leave the same record
            PollOutcome::Error(CheckoutError::PaymentDeclined { reason, .. }) => {
                let event = PaymentEvent::declined_by_poll(info.provider.clone(), external_order_id, reason);
                self.coordinator.apply_payment_event(order_id, event).await?.into()
            }
            PollOutcome::Error(e) => return Err(e),
        };

        let order = self.snapshot(user_id, order_id, is_admin).await?;
        Ok(VerifyReport { outcome, order })
    }

    /// Authenticate a provider callback and apply it to its order
    #[instrument(skip(self, body, headers))]
    pub async fn handle_callback(
        &self,
        provider: &str,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> CheckoutResult<CallbackOutcome> {
        let gateway = self.gateways.require(provider)?;
        let Some(event) = gateway.parse_callback(body, headers).await? else {
            return Ok(CallbackOutcome::Ignored);
        };

        let order_id = self
            .orders
            .resolve_external(provider, &event.external_order_id)
            .await
            .ok_or_else(|| CheckoutError::NotFound {
                entity: "payment",
                id: event.external_order_id.clone(),
            })?;

        let outcome = self.coordinator.apply_payment_event(&order_id, event).await?;
        Ok(CallbackOutcome::Processed { order_id, outcome })
    }

    /// [`handle_callback`](Self::handle_callback), retried with backoff while
    /// the failure may be transient
    pub async fn ingest_callback(
        &self,
        provider: &str,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> CheckoutResult<CallbackOutcome> {
        let mut backoff = self.callback_retry.backoff;
        let mut attempt = 1;
        loop {
            match self.handle_callback(provider, body, headers).await {
                Err(e) if attempt < self.callback_retry.max_attempts && worth_retrying(&e) => {
                    let wait = match &e {
                        CheckoutError::RateLimited { retry_after_secs, .. } => {
                            backoff.max(Duration::from_secs(*retry_after_secs))
                        }
                        _ => backoff,
                    };
                    warn!(provider, attempt, ?wait, "Callback processing failed, retrying: {}", e);
                    tokio::time::sleep(wait).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// Record a payment taken outside a gateway (cash on delivery)
    #[instrument(skip(self))]
    pub async fn record_manual_payment(
        &self,
        order_id: &str,
        reference: &str,
        amount: i64,
    ) -> CheckoutResult<ApplyOutcome> {
        let handle = self.orders.require(order_id).await?;
        let currency = handle.lock().await.currency();
        let event = PaymentEvent::manual(MANUAL_PROVIDER, reference, amount, currency);
        self.coordinator.apply_payment_event(order_id, event).await
    }
}

impl From<ApplyOutcome> for VerifyOutcome {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied => VerifyOutcome::Paid,
            ApplyOutcome::AlreadyApplied => VerifyOutcome::AlreadyPaid,
            ApplyOutcome::Pending => VerifyOutcome::NotYetPaid,
            ApplyOutcome::Declined { status } => VerifyOutcome::Declined { status },
            ApplyOutcome::Rejected(reason) => VerifyOutcome::ManualReview { reason },
        }
    }
}
