//! # Order Types
//!
//! The order record and its state machine.
//!
//! ```text
//! pending ──place──▶ confirmed ──mark_paid──▶ paid ──deliver──▶ delivered
//!    │                   │                     │
//!    └───────────────────┴──────cancel─────────┴──▶ cancelled
//! ```
//!
//! `pending` is the only state with mutable draft data (shipping address,
//! payment method). Items and totals are frozen when the order is placed;
//! afterwards only status, payment and delivery fields change. Transition
//! methods are crate-private: orders are only driven through the lifecycle
//! manager and the reconciliation coordinator, which hold the order's lock.

use crate::cart::CartLine;
use crate::error::{CheckoutError, CheckoutResult};
use crate::gateway::{PaymentChannel, PaymentEvent};
use crate::money::Currency;
use crate::pricing::Totals;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest difference (minor units) tolerated between paid amount and order total
pub const AMOUNT_TOLERANCE: i64 = 1;

/// Order lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Paid,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine has an edge from `self` to `next`
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Paid)
                | (Paid, Delivered)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Paid, Cancelled)
        )
    }

    /// No further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A line frozen into an order when it is placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub price: i64,
    pub original_price: i64,
    pub quantity: u32,
    pub is_prime: bool,
}

impl From<&CartLine> for OrderItem {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id.clone(),
            variant: line.variant.clone(),
            name: line.name.clone(),
            image: line.image.clone(),
            brand: line.brand.clone(),
            category: line.category.clone(),
            price: line.price,
            original_price: line.original_price,
            quantity: line.quantity,
            is_prime: line.is_prime,
        }
    }
}

impl OrderItem {
    pub fn total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

/// Where the order ships
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub full_name: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    /// State/province code; selects the tax rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ShippingAddress {
    pub fn validate(&self) -> CheckoutResult<()> {
        let required = [
            ("full_name", &self.full_name),
            ("address", &self.address),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(CheckoutError::Validation(format!(
                    "shipping address {} is required",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Details collected for a wallet checkout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer_email: Option<String>,
}

/// Billing data the iframe gateway requires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IframeDetails {
    pub email: String,
    pub phone: String,
    pub first_name: String,
    pub last_name: String,
}

/// How the customer pays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "details", rename_all = "snake_case")]
pub enum PaymentMethod {
    #[serde(rename = "paypal")]
    PayPal(WalletDetails),
    Paymob(IframeDetails),
    CashOnDelivery,
}

impl PaymentMethod {
    /// Gateway that settles this method; `None` for offline methods
    pub fn provider(&self) -> Option<&'static str> {
        match self {
            PaymentMethod::PayPal(_) => Some("paypal"),
            PaymentMethod::Paymob(_) => Some("paymob"),
            PaymentMethod::CashOnDelivery => None,
        }
    }

    pub fn validate(&self) -> CheckoutResult<()> {
        if let PaymentMethod::Paymob(details) = self {
            if details.email.trim().is_empty() || details.phone.trim().is_empty() {
                return Err(CheckoutError::Validation(
                    "paymob payments require billing email and phone".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Proof of payment attached when the order becomes paid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub provider: String,
    pub transaction_id: String,
    /// Provider status string, verbatim
    pub status: String,
    pub amount: i64,
    pub raw_payload: serde_json::Value,
    pub channel: PaymentChannel,
    pub recorded_at: DateTime<Utc>,
}

impl From<&PaymentEvent> for PaymentRecord {
    fn from(event: &PaymentEvent) -> Self {
        Self {
            provider: event.provider.clone(),
            transaction_id: event
                .transaction_id
                .clone()
                .unwrap_or_else(|| event.provider_event_id.clone()),
            status: event.status.clone(),
            amount: event.amount,
            raw_payload: event.raw_payload.clone(),
            channel: event.channel,
            recorded_at: Utc::now(),
        }
    }
}

/// Provider correlation data, kept between initiate and confirm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub provider: String,
    pub external_order_id: String,
    /// Dropped once the order is paid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    pub initiated_at: DateTime<Utc>,
}

/// What a payment event recorded on the order was about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Provider reported a different amount than the order total
    AmountMismatch,
    /// Provider settled in a different currency than the order
    CurrencyMismatch,
    /// Money arrived for an order that cannot accept it
    NotPayable,
    /// Provider declined the payment; the customer may retry
    Declined,
}

impl IssueKind {
    /// Money may have moved and an operator has to settle it
    pub fn requires_manual_review(self) -> bool {
        matches!(
            self,
            IssueKind::AmountMismatch | IssueKind::CurrencyMismatch | IssueKind::NotPayable
        )
    }
}

/// A payment event that did not mark the order paid, kept on the order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationIssue {
    pub kind: IssueKind,
    pub provider: String,
    pub provider_event_id: String,
    pub channel: PaymentChannel,
    pub expected_amount: i64,
    pub received_amount: i64,
    /// Order status when the event arrived
    pub order_status: OrderStatus,
    pub detail: String,
    pub raw_payload: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl ReconciliationIssue {
    pub fn new(kind: IssueKind, order: &Order, event: &PaymentEvent, detail: impl Into<String>) -> Self {
        Self {
            kind,
            provider: event.provider.clone(),
            provider_event_id: event.provider_event_id.clone(),
            channel: event.channel,
            expected_amount: order.totals.grand_total,
            received_amount: event.amount,
            order_status: order.status,
            detail: detail.into(),
            raw_payload: event.raw_payload.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// An order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: String,
    order_number: String,
    user_id: String,
    status: OrderStatus,
    items: Vec<OrderItem>,
    totals: Totals,
    currency: Currency,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shipping_address: Option<ShippingAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_method: Option<PaymentMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_info: Option<PaymentInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payment_result: Option<PaymentRecord>,
    is_paid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    paid_at: Option<DateTime<Utc>>,
    is_delivered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivered_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    placed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cancellation_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    reconciliation_issues: Vec<ReconciliationIssue>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// `ORD-<unix millis>-<9 alphanumerics>`
fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(9)
        .collect::<String>()
        .to_ascii_uppercase();
    format!("ORD-{}-{}", now.timestamp_millis(), suffix)
}

impl Order {
    /// A fresh `pending` draft with no items
    pub(crate) fn new_draft(user_id: impl Into<String>, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            order_number: generate_order_number(now),
            user_id: user_id.into(),
            status: OrderStatus::Pending,
            items: Vec::new(),
            totals: Totals::default(),
            currency,
            shipping_address: None,
            payment_method: None,
            payment_info: None,
            payment_result: None,
            is_paid: false,
            paid_at: None,
            is_delivered: false,
            delivered_at: None,
            placed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            reconciliation_issues: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn shipping_address(&self) -> Option<&ShippingAddress> {
        self.shipping_address.as_ref()
    }

    pub fn payment_method(&self) -> Option<&PaymentMethod> {
        self.payment_method.as_ref()
    }

    pub fn payment_info(&self) -> Option<&PaymentInfo> {
        self.payment_info.as_ref()
    }

    pub fn payment_result(&self) -> Option<&PaymentRecord> {
        self.payment_result.as_ref()
    }

    pub fn is_paid(&self) -> bool {
        self.is_paid
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn is_delivered(&self) -> bool {
        self.is_delivered
    }

    pub fn delivered_at(&self) -> Option<DateTime<Utc>> {
        self.delivered_at
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.cancellation_reason.as_deref()
    }

    pub fn reconciliation_issues(&self) -> &[ReconciliationIssue] {
        &self.reconciliation_issues
    }

    /// An operator has to look at the order. Declines alone don't count.
    pub fn needs_manual_review(&self) -> bool {
        self.reconciliation_issues
            .iter()
            .any(|issue| issue.kind.requires_manual_review())
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Amount the customer owes (minor units)
    pub fn amount_due(&self) -> i64 {
        self.totals.grand_total
    }

    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|i| i.quantity).sum()
    }

    fn invalid_transition(&self, to: OrderStatus) -> CheckoutError {
        CheckoutError::InvalidTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }

    fn ensure_pending(&self) -> CheckoutResult<()> {
        if self.status != OrderStatus::Pending {
            return Err(CheckoutError::Validation(format!(
                "order {} is {} and can no longer be edited",
                self.order_number, self.status
            )));
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub(crate) fn set_shipping_address(&mut self, address: ShippingAddress) -> CheckoutResult<()> {
        self.ensure_pending()?;
        address.validate()?;
        self.shipping_address = Some(address);
        self.touch();
        Ok(())
    }

    pub(crate) fn set_payment_method(&mut self, method: PaymentMethod) -> CheckoutResult<()> {
        self.ensure_pending()?;
        method.validate()?;
        self.payment_method = Some(method);
        self.touch();
        Ok(())
    }

    /// Check that the draft can be placed with the given lines
    pub(crate) fn ensure_placeable(&self, lines: &[CartLine]) -> CheckoutResult<()> {
        match self.status {
            OrderStatus::Pending => {}
            OrderStatus::Confirmed => {
                return Err(CheckoutError::Conflict(format!(
                    "order {} is already confirmed",
                    self.order_number
                )))
            }
            _ => return Err(self.invalid_transition(OrderStatus::Confirmed)),
        }
        if self.shipping_address.is_none() {
            return Err(CheckoutError::Validation(
                "a shipping address is required before placing the order".to_string(),
            ));
        }
        if lines.is_empty() {
            return Err(CheckoutError::Validation("cart is empty".to_string()));
        }
        Ok(())
    }

    /// `pending → confirmed`: freeze items and totals. Infallible; callers run
    /// [`ensure_placeable`](Self::ensure_placeable) first.
    pub(crate) fn place(&mut self, lines: &[CartLine], totals: Totals, currency: Currency) {
        let now = Utc::now();
        self.items = lines.iter().map(OrderItem::from).collect();
        self.totals = totals;
        self.currency = currency;
        self.status = OrderStatus::Confirmed;
        self.placed_at = Some(now);
        self.updated_at = now;
    }

    /// Draft preview: show what placing the order would freeze
    pub(crate) fn preview(&mut self, lines: &[CartLine], totals: Totals) {
        self.items = lines.iter().map(OrderItem::from).collect();
        self.totals = totals;
    }

    /// Ready for a gateway to take payment
    pub(crate) fn ensure_payable(&self) -> CheckoutResult<()> {
        match self.status {
            OrderStatus::Confirmed => Ok(()),
            OrderStatus::Paid | OrderStatus::Delivered => Err(CheckoutError::Conflict(format!(
                "order {} is already paid",
                self.order_number
            ))),
            _ => Err(self.invalid_transition(OrderStatus::Paid)),
        }
    }

    pub(crate) fn attach_payment_info(&mut self, info: PaymentInfo) -> CheckoutResult<()> {
        self.ensure_payable()?;
        self.payment_info = Some(info);
        self.touch();
        Ok(())
    }

    /// Check the paid amount against the order total
    pub(crate) fn check_amount(&self, received: i64) -> CheckoutResult<()> {
        let expected = self.totals.grand_total;
        if (expected - received).abs() > AMOUNT_TOLERANCE {
            return Err(CheckoutError::AmountMismatch { expected, received });
        }
        Ok(())
    }

    /// `confirmed → paid`
    pub(crate) fn mark_paid(&mut self, record: PaymentRecord) -> CheckoutResult<()> {
        self.ensure_payable()?;
        self.check_amount(record.amount)?;

        let now = Utc::now();
        self.status = OrderStatus::Paid;
        self.is_paid = true;
        self.paid_at = Some(now);
        self.payment_result = Some(record);
        if let Some(info) = self.payment_info.as_mut() {
            info.client_token = None;
        }
        self.updated_at = now;
        Ok(())
    }

    /// `paid → delivered`
    pub(crate) fn deliver(&mut self) -> CheckoutResult<()> {
        match self.status {
            OrderStatus::Paid if self.is_paid => {}
            OrderStatus::Delivered => {
                return Err(CheckoutError::Conflict(format!(
                    "order {} is already delivered",
                    self.order_number
                )))
            }
            _ => return Err(self.invalid_transition(OrderStatus::Delivered)),
        }
        let now = Utc::now();
        self.status = OrderStatus::Delivered;
        self.is_delivered = true;
        self.delivered_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Any pre-delivered state `→ cancelled`
    pub(crate) fn cancel(&mut self, reason: Option<String>) -> CheckoutResult<()> {
        match self.status {
            OrderStatus::Cancelled => {
                return Err(CheckoutError::Conflict(format!(
                    "order {} is already cancelled",
                    self.order_number
                )))
            }
            OrderStatus::Delivered => return Err(self.invalid_transition(OrderStatus::Cancelled)),
            _ => {}
        }
        let now = Utc::now();
        self.status = OrderStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.updated_at = now;
        Ok(())
    }

    /// Record an issue once per provider event; redeliveries are dropped
    pub(crate) fn flag(&mut self, issue: ReconciliationIssue) -> bool {
        let seen = self.reconciliation_issues.iter().any(|existing| {
            existing.kind == issue.kind
                && existing.provider == issue.provider
                && existing.provider_event_id == issue.provider_event_id
        });
        if seen {
            return false;
        }
        self.reconciliation_issues.push(issue);
        self.touch();
        true
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address() -> ShippingAddress {
        ShippingAddress {
            full_name: "Ada Lovelace".into(),
            address: "12 Analytical Way".into(),
            city: "Austin".into(),
            postal_code: "73301".into(),
            country: "US".into(),
            state: Some("TX".into()),
        }
    }

    fn totals(grand_total: i64) -> Totals {
        Totals {
            subtotal: grand_total,
            grand_total,
            ..Totals::default()
        }
    }

    fn record(amount: i64) -> PaymentRecord {
        PaymentRecord {
            provider: "paypal".into(),
            transaction_id: "TXN-1".into(),
            status: "COMPLETED".into(),
            amount,
            raw_payload: serde_json::Value::Null,
            channel: PaymentChannel::Webhook,
            recorded_at: Utc::now(),
        }
    }

    fn confirmed(grand_total: i64) -> Order {
        let mut order = Order::new_draft("alice", Currency::USD);
        order.set_shipping_address(address()).unwrap();
        let lines = [CartLine::test_line("p1", grand_total, 1)];
        order.ensure_placeable(&lines).unwrap();
        order.place(&lines, totals(grand_total), Currency::USD);
        order
    }

    #[test]
    fn test_order_number_format() {
        let order = Order::new_draft("alice", Currency::USD);
        let parts: Vec<&str> = order.order_number().splitn(3, '-').collect();
        assert_eq!(parts[0], "ORD");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
        assert!(parts[2].chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_state_machine_edges() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Paid.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Paid));
        assert!(!Delivered.can_transition_to(Cancelled));
        assert!(!Confirmed.can_transition_to(Confirmed));
    }

    #[test]
    fn test_place_requires_address_and_items() {
        let order = Order::new_draft("alice", Currency::USD);
        let lines = [CartLine::test_line("p1", 100, 1)];
        assert!(matches!(
            order.ensure_placeable(&lines),
            Err(CheckoutError::Validation(_))
        ));

        let mut order = order;
        order.set_shipping_address(address()).unwrap();
        assert!(matches!(
            order.ensure_placeable(&[]),
            Err(CheckoutError::Validation(_))
        ));
    }

    #[test]
    fn test_draft_fields_frozen_after_place() {
        let mut order = confirmed(5239);
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert!(order.placed_at().is_some());
        assert!(order.set_shipping_address(address()).is_err());
        assert!(order.set_payment_method(PaymentMethod::CashOnDelivery).is_err());

        let err = order.ensure_placeable(&[CartLine::test_line("p1", 1, 1)]).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_mark_paid_within_tolerance_drops_token() {
        let mut order = confirmed(5239);
        order
            .attach_payment_info(PaymentInfo {
                provider: "paypal".into(),
                external_order_id: "EXT".into(),
                client_token: Some("secret".into()),
                redirect_url: None,
                initiated_at: Utc::now(),
            })
            .unwrap();

        order.mark_paid(record(5238)).unwrap();

        assert!(order.is_paid());
        assert!(order.paid_at().is_some());
        assert_eq!(order.status(), OrderStatus::Paid);
        assert!(order.payment_info().unwrap().client_token.is_none());
    }

    #[test]
    fn test_mark_paid_amount_mismatch_keeps_confirmed() {
        let mut order = confirmed(5239);
        let err = order.mark_paid(record(1000)).unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::AmountMismatch {
                expected: 5239,
                received: 1000
            }
        ));
        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert!(!order.is_paid());
    }

    #[test]
    fn test_reentering_paid_is_conflict() {
        let mut order = confirmed(100);
        order.mark_paid(record(100)).unwrap();
        assert!(order.mark_paid(record(100)).unwrap_err().is_conflict());
    }

    #[test]
    fn test_pending_cannot_be_paid() {
        let mut order = Order::new_draft("alice", Currency::USD);
        assert!(matches!(
            order.mark_paid(record(0)),
            Err(CheckoutError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_deliver_requires_paid() {
        let mut order = confirmed(100);
        assert!(matches!(
            order.deliver(),
            Err(CheckoutError::InvalidTransition { .. })
        ));

        order.mark_paid(record(100)).unwrap();
        order.deliver().unwrap();
        assert!(order.is_delivered() && order.is_paid());
        assert!(order.deliver().unwrap_err().is_conflict());
    }

    #[test]
    fn test_cancel_rules() {
        let mut order = confirmed(100);
        order.cancel(Some("changed my mind".into())).unwrap();
        assert_eq!(order.cancellation_reason(), Some("changed my mind"));
        assert!(order.cancel(None).unwrap_err().is_conflict());

        let mut delivered = confirmed(100);
        delivered.mark_paid(record(100)).unwrap();
        delivered.deliver().unwrap();
        assert!(matches!(
            delivered.cancel(None),
            Err(CheckoutError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_payment_method_tagging() {
        let method = PaymentMethod::PayPal(WalletDetails::default());
        let json = serde_json::to_value(&method).unwrap();
        assert_eq!(json["kind"], "paypal");
        assert_eq!(method.provider(), Some("paypal"));
        assert_eq!(PaymentMethod::CashOnDelivery.provider(), None);

        let parsed: PaymentMethod = serde_json::from_value(serde_json::json!({
            "kind": "paymob",
            "details": {"email": "a@b.c", "phone": "+201000000000", "first_name": "A", "last_name": "B"}
        }))
        .unwrap();
        assert_eq!(parsed.provider(), Some("paymob"));
    }
}
