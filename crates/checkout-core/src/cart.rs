//! # Cart Store
//!
//! Holds line items and applied coupons per [`Identity`]. Every mutation
//! runs against a scratch copy of the cart, is repriced through the
//! [`PricingEngine`], and only then replaces the stored cart under that
//! cart's lock. Readers therefore never observe lines whose totals snapshot
//! is stale, and a failed mutation leaves the stored cart untouched.
//!
//! Carts for different identities are independent: each sits behind its own
//! `tokio::sync::Mutex`, and the identity index is only locked long enough
//! to clone a handle.

use crate::catalog::Catalog;
use crate::coupon::{Coupon, CouponBook};
use crate::error::{CheckoutError, CheckoutResult};
use crate::identity::Identity;
use crate::money::Currency;
use crate::pricing::{PricingEngine, ShippingProfile, Totals};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

/// Smallest quantity a line may hold
pub const MIN_LINE_QUANTITY: u32 = 1;

/// Largest quantity a line may hold
pub const MAX_LINE_QUANTITY: u32 = 30;

/// A product line in a cart, snapshotted from the catalog at add time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CartLine {
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
    /// Unit price actually charged (minor units)
    pub price: i64,
    /// Unit list price before markdown (minor units)
    pub original_price: i64,
    pub quantity: u32,
    pub is_prime: bool,
    pub is_free_shipping: bool,
    pub added_at: DateTime<Utc>,
}

impl CartLine {
    fn matches(&self, product_id: &str, variant: Option<&str>) -> bool {
        self.product_id == product_id && self.variant.as_deref() == variant
    }

    /// Price × quantity
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }

    #[cfg(test)]
    pub(crate) fn test_line(product_id: &str, price: i64, quantity: u32) -> Self {
        Self {
            product_id: product_id.to_string(),
            variant: None,
            name: product_id.to_string(),
            image: None,
            brand: None,
            category: None,
            price,
            original_price: price,
            quantity,
            is_prime: false,
            is_free_shipping: false,
            added_at: Utc::now(),
        }
    }
}

/// A cart with its materialized totals
#[derive(Debug, Clone, Serialize)]
pub struct Cart {
    identity: Identity,
    currency: Currency,
    lines: Vec<CartLine>,
    coupons: BTreeMap<String, Coupon>,
    shipping: ShippingProfile,
    totals: Totals,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Cart {
    fn new(identity: Identity, currency: Currency, shipping: ShippingProfile) -> Self {
        let now = Utc::now();
        Self {
            identity,
            currency,
            lines: Vec::new(),
            coupons: BTreeMap::new(),
            shipping,
            totals: Totals::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn currency(&self) -> Currency {
        self.currency
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Applied coupons, ordered by code
    pub fn coupons(&self) -> impl Iterator<Item = &Coupon> {
        self.coupons.values()
    }

    pub fn shipping(&self) -> &ShippingProfile {
        &self.shipping
    }

    pub fn totals(&self) -> &Totals {
        &self.totals
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of line quantities
    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).sum()
    }

    fn line(&self, product_id: &str, variant: Option<&str>) -> Option<&CartLine> {
        self.lines.iter().find(|l| l.matches(product_id, variant))
    }

    fn line_mut(&mut self, product_id: &str, variant: Option<&str>) -> Option<&mut CartLine> {
        self.lines.iter_mut().find(|l| l.matches(product_id, variant))
    }

    /// Insert a line or fold its quantity into an existing product+variant line
    fn upsert_line(&mut self, line: CartLine) {
        match self.line_mut(&line.product_id, line.variant.as_deref()) {
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .saturating_add(line.quantity)
                    .clamp(MIN_LINE_QUANTITY, MAX_LINE_QUANTITY);
            }
            None => {
                let mut line = line;
                line.quantity = line.quantity.clamp(MIN_LINE_QUANTITY, MAX_LINE_QUANTITY);
                self.lines.push(line);
            }
        }
    }

    pub(crate) fn clear_lines(&mut self) {
        self.lines.clear();
        self.coupons.clear();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn validate_quantity(quantity: u32) -> CheckoutResult<()> {
    if !(MIN_LINE_QUANTITY..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(CheckoutError::InvalidQuantity {
            quantity,
            min: MIN_LINE_QUANTITY,
            max: MAX_LINE_QUANTITY,
        });
    }
    Ok(())
}

/// Treat an empty variant selector the same as no selector
fn normalize_variant(variant: Option<String>) -> Option<String> {
    variant
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

type CartHandle = Arc<Mutex<Cart>>;

/// Per-identity cart storage
pub struct CartStore {
    carts: RwLock<HashMap<Identity, CartHandle>>,
    catalog: Arc<dyn Catalog>,
    coupons: CouponBook,
    engine: PricingEngine,
    currency: Currency,
}

impl CartStore {
    pub fn new(catalog: Arc<dyn Catalog>, coupons: CouponBook, engine: PricingEngine) -> Self {
        Self {
            carts: RwLock::new(HashMap::new()),
            catalog,
            coupons,
            engine,
            currency: Currency::default(),
        }
    }

    /// Builder: currency new carts are priced in
    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currency = currency;
        self
    }

    pub fn engine(&self) -> &PricingEngine {
        &self.engine
    }

    /// Read a cart. A missing cart reads as an empty one.
    pub async fn get(&self, identity: &Identity) -> Cart {
        match self.handle(identity).await {
            Some(handle) => handle.lock().await.clone(),
            None => self.empty_cart(identity.clone()),
        }
    }

    /// Sum of quantities in the cart (0 for a missing cart)
    pub async fn item_count(&self, identity: &Identity) -> u32 {
        self.get(identity).await.item_count()
    }

    /// Add a product, or raise the quantity of the matching product+variant line.
    /// The resulting line quantity is clamped to the per-line maximum.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn add_line(
        &self,
        identity: &Identity,
        product_id: &str,
        variant: Option<String>,
        quantity: u32,
    ) -> CheckoutResult<Cart> {
        validate_quantity(quantity)?;
        if product_id.trim().is_empty() {
            return Err(CheckoutError::Validation("product id is required".to_string()));
        }

        let product = self
            .catalog
            .product(product_id)
            .await?
            .ok_or_else(|| CheckoutError::ProductNotFound {
                product_id: product_id.to_string(),
            })?;
        let variant = normalize_variant(variant);

        let handle = self.handle_or_create(identity).await;
        let cart = self
            .mutate(handle, |cart| {
                let existing = cart
                    .line(&product.id, variant.as_deref())
                    .map(|l| l.quantity)
                    .unwrap_or(0);
                let requested = existing.saturating_add(quantity).min(MAX_LINE_QUANTITY);
                if requested > product.stock {
                    return Err(CheckoutError::OutOfStock {
                        product_id: product.id.clone(),
                        requested,
                        available: product.stock,
                    });
                }

                cart.upsert_line(CartLine {
                    product_id: product.id.clone(),
                    variant: variant.clone(),
                    name: product.name.clone(),
                    image: product.image.clone(),
                    brand: product.brand.clone(),
                    category: product.category.clone(),
                    price: product.price,
                    original_price: product.list_price(),
                    quantity,
                    is_prime: product.is_prime,
                    is_free_shipping: product.is_free_shipping,
                    added_at: Utc::now(),
                });
                Ok(())
            })
            .await?;

        debug!(lines = cart.lines.len(), total = cart.totals.grand_total, "Line added");
        Ok(cart)
    }

    /// Set the quantity of an existing line
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn update_quantity(
        &self,
        identity: &Identity,
        product_id: &str,
        variant: Option<String>,
        quantity: u32,
    ) -> CheckoutResult<Cart> {
        validate_quantity(quantity)?;
        let variant = normalize_variant(variant);
        let handle = self.existing_handle(identity).await?;

        self.mutate(handle, |cart| {
            let line = cart
                .line_mut(product_id, variant.as_deref())
                .ok_or_else(|| line_not_found(product_id))?;
            line.quantity = quantity;
            Ok(())
        })
        .await
    }

    /// Remove a line
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn remove_line(
        &self,
        identity: &Identity,
        product_id: &str,
        variant: Option<String>,
    ) -> CheckoutResult<Cart> {
        let variant = normalize_variant(variant);
        let handle = self.existing_handle(identity).await?;

        self.mutate(handle, |cart| {
            let before = cart.lines.len();
            cart.lines.retain(|l| !l.matches(product_id, variant.as_deref()));
            if cart.lines.len() == before {
                return Err(line_not_found(product_id));
            }
            Ok(())
        })
        .await
    }

    /// Remove all lines and coupons
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn clear(&self, identity: &Identity) -> CheckoutResult<Cart> {
        match self.handle(identity).await {
            Some(handle) => {
                self.mutate(handle, |cart| {
                    cart.clear_lines();
                    Ok(())
                })
                .await
            }
            None => Ok(self.empty_cart(identity.clone())),
        }
    }

    /// Apply a coupon code. Re-applying a code already on the cart is a no-op.
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn apply_coupon(&self, identity: &Identity, code: &str) -> CheckoutResult<Cart> {
        let coupon = self
            .coupons
            .get(code)
            .cloned()
            .ok_or_else(|| CheckoutError::UnknownCoupon {
                code: code.to_string(),
            })?;

        let handle = self.handle_or_create(identity).await;
        self.mutate(handle, |cart| {
            cart.coupons.entry(coupon.code.clone()).or_insert(coupon);
            Ok(())
        })
        .await
    }

    /// Remove an applied coupon; removing a code that is not applied is a no-op
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn remove_coupon(&self, identity: &Identity, code: &str) -> CheckoutResult<Cart> {
        match self.handle(identity).await {
            Some(handle) => {
                self.mutate(handle, |cart| {
                    cart.coupons.remove(code);
                    Ok(())
                })
                .await
            }
            None => Ok(self.empty_cart(identity.clone())),
        }
    }

    /// Set the destination jurisdiction used for tax selection
    #[instrument(skip(self, identity), fields(identity = %identity))]
    pub async fn set_jurisdiction(
        &self,
        identity: &Identity,
        jurisdiction: Option<String>,
    ) -> CheckoutResult<Cart> {
        let handle = self.handle_or_create(identity).await;
        self.mutate(handle, |cart| {
            cart.shipping.jurisdiction = jurisdiction;
            Ok(())
        })
        .await
    }

    /// Fold a guest session's cart into a user's cart on login.
    ///
    /// Lines match on product+variant and quantities are summed (clamped);
    /// the guest cart is deleted afterwards.
    #[instrument(skip(self))]
    pub async fn merge(&self, guest_session: &str, user_id: &str) -> CheckoutResult<Cart> {
        let guest = Identity::guest(guest_session);
        let user = Identity::user(user_id);

        let Some(guest_handle) = self.handle(&guest).await else {
            return Ok(self.get(&user).await);
        };

        // Guest before user; the two identities never swap roles, so the
        // lock order is the same for every merge.
        let mut guest_cart = guest_handle.lock().await;
        if guest_cart.is_empty() {
            self.carts.write().await.remove(&guest);
            drop(guest_cart);
            return Ok(self.get(&user).await);
        }

        let user_handle = self.handle_or_create(&user).await;
        let merged = self
            .mutate(user_handle, |cart| {
                for line in &guest_cart.lines {
                    cart.upsert_line(line.clone());
                }
                Ok(())
            })
            .await?;

        let moved = guest_cart.lines.len();
        guest_cart.clear_lines();
        self.reprice(&mut guest_cart);
        self.carts.write().await.remove(&guest);

        info!(moved, user = user_id, "Merged guest cart");
        Ok(merged)
    }

    /// Lock a cart for a multi-entity transaction, creating it if needed
    pub(crate) async fn lock(&self, identity: &Identity) -> OwnedMutexGuard<Cart> {
        self.handle_or_create(identity).await.lock_owned().await
    }

    /// Recompute the totals snapshot from the cart's current lines
    pub(crate) fn reprice(&self, cart: &mut Cart) {
        let totals = self
            .engine
            .compute_totals(&cart.lines, cart.coupons.values(), &cart.shipping);
        if totals.discount_exceeds_subtotal() {
            warn!(
                identity = %cart.identity,
                subtotal = totals.subtotal,
                coupon_discount = totals.coupon_discount,
                "Stacked coupons exceed subtotal"
            );
        }
        cart.totals = totals;
        cart.touch();
    }

    /// Apply `mutation` to a scratch copy, reprice it, then commit
    async fn mutate<F>(&self, handle: CartHandle, mutation: F) -> CheckoutResult<Cart>
    where
        F: FnOnce(&mut Cart) -> CheckoutResult<()>,
    {
        let mut stored = handle.lock().await;
        let mut draft = stored.clone();
        mutation(&mut draft)?;
        self.reprice(&mut draft);
        *stored = draft;
        Ok(stored.clone())
    }

    fn empty_cart(&self, identity: Identity) -> Cart {
        let mut cart = Cart::new(identity, self.currency, self.engine.shipping_profile(None));
        self.reprice(&mut cart);
        cart
    }

    async fn handle(&self, identity: &Identity) -> Option<CartHandle> {
        self.carts.read().await.get(identity).cloned()
    }

    async fn existing_handle(&self, identity: &Identity) -> CheckoutResult<CartHandle> {
        self.handle(identity).await.ok_or_else(|| CheckoutError::NotFound {
            entity: "cart",
            id: identity.to_string(),
        })
    }

    async fn handle_or_create(&self, identity: &Identity) -> CartHandle {
        if let Some(handle) = self.handle(identity).await {
            return handle;
        }
        let mut carts = self.carts.write().await;
        carts
            .entry(identity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(self.empty_cart(identity.clone()))))
            .clone()
    }
}

fn line_not_found(product_id: &str) -> CheckoutError {
    CheckoutError::NotFound {
        entity: "cart line",
        id: product_id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogProduct, ProductCatalog};
    use crate::money::Rate;

    fn store() -> CartStore {
        let catalog = ProductCatalog::new()
            .with_product(CatalogProduct::new("p1", "Widget", 2000, 100))
            .with_product(CatalogProduct::new("p2", "Gadget", 1550, 100).with_original_price(1999))
            .with_product(CatalogProduct::new("prime", "Prime Thing", 500, 100).prime())
            .with_product(CatalogProduct::new("scarce", "Last One", 900, 2));
        let coupons = CouponBook::new()
            .with_coupon(Coupon::percentage("SAVE10", Rate::from_bps(1000)))
            .with_coupon(Coupon::fixed("FIVEOFF", 500).with_min_order(5000));
        CartStore::new(Arc::new(catalog), coupons, PricingEngine::default())
    }

    fn alice() -> Identity {
        Identity::user("alice")
    }

    fn assert_subtotal_invariant(cart: &Cart) {
        let expected: i64 = cart.lines().iter().map(CartLine::line_total).sum();
        assert_eq!(cart.totals().subtotal, expected);
        let t = cart.totals();
        assert_eq!(
            t.grand_total,
            t.subtotal - t.coupon_discount + t.shipping_cost + t.estimated_tax
        );
    }

    #[tokio::test]
    async fn test_missing_cart_reads_empty() {
        let store = store();
        let cart = store.get(&Identity::guest("nobody")).await;
        assert!(cart.is_empty());
        assert_eq!(cart.totals().grand_total, 0);
        assert_eq!(store.item_count(&Identity::guest("nobody")).await, 0);
    }

    #[tokio::test]
    async fn test_add_line_snapshots_catalog_and_prices() {
        let store = store();
        let cart = store.add_line(&alice(), "p2", None, 2).await.unwrap();

        let line = &cart.lines()[0];
        assert_eq!(line.name, "Gadget");
        assert_eq!(line.price, 1550);
        assert_eq!(line.original_price, 1999);
        assert_eq!(cart.totals().subtotal, 3100);
        assert_eq!(cart.totals().items_discount, 898);
        assert_subtotal_invariant(&cart);
    }

    #[tokio::test]
    async fn test_add_line_upserts_by_product_and_variant() {
        let store = store();
        store.add_line(&alice(), "p1", Some("red".into()), 1).await.unwrap();
        store.add_line(&alice(), "p1", Some("red".into()), 2).await.unwrap();
        store.add_line(&alice(), "p1", Some("blue".into()), 1).await.unwrap();
        let cart = store.add_line(&alice(), "p1", Some("".into()), 1).await.unwrap();

        assert_eq!(cart.lines().len(), 3);
        assert_eq!(cart.lines()[0].quantity, 3);
        assert_eq!(cart.lines()[2].variant, None);
        assert_eq!(cart.item_count(), 5);
    }

    #[tokio::test]
    async fn test_upsert_clamps_to_max_quantity() {
        let store = store();
        store.add_line(&alice(), "p1", None, 25).await.unwrap();
        let cart = store.add_line(&alice(), "p1", None, 10).await.unwrap();
        assert_eq!(cart.lines()[0].quantity, MAX_LINE_QUANTITY);
        assert_subtotal_invariant(&cart);
    }

    #[tokio::test]
    async fn test_quantity_out_of_range_rejected() {
        let store = store();
        for bad in [0, 31] {
            let err = store.add_line(&alice(), "p1", None, bad).await.unwrap_err();
            assert!(matches!(err, CheckoutError::InvalidQuantity { .. }));
        }
        assert!(store.get(&alice()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_product_rejected() {
        let store = store();
        let err = store.add_line(&alice(), "nope", None, 1).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ProductNotFound { .. }));
    }

    #[tokio::test]
    async fn test_out_of_stock_leaves_cart_unchanged() {
        let store = store();
        store.add_line(&alice(), "scarce", None, 2).await.unwrap();
        let err = store.add_line(&alice(), "scarce", None, 1).await.unwrap_err();
        assert!(matches!(err, CheckoutError::OutOfStock { available: 2, .. }));
        assert_eq!(store.get(&alice()).await.lines()[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_update_quantity_keeps_subtotal_invariant() {
        let store = store();
        store.add_line(&alice(), "p1", None, 1).await.unwrap();
        store.add_line(&alice(), "p2", None, 1).await.unwrap();

        for quantity in [1, 7, 30, 2] {
            let cart = store.update_quantity(&alice(), "p1", None, quantity).await.unwrap();
            assert_subtotal_invariant(&cart);
            assert_eq!(cart.totals().subtotal, 2000 * i64::from(quantity) + 1550);
        }

        let err = store.update_quantity(&alice(), "p1", None, 31).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidQuantity { .. }));
        let err = store.update_quantity(&alice(), "missing", None, 1).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { entity: "cart line", .. }));
        let err = store
            .update_quantity(&Identity::guest("ghost"), "p1", None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { entity: "cart", .. }));
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let store = store();
        store.add_line(&alice(), "p1", None, 1).await.unwrap();
        store.add_line(&alice(), "p2", None, 1).await.unwrap();

        let cart = store.remove_line(&alice(), "p1", None).await.unwrap();
        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.totals().subtotal, 1550);

        let err = store.remove_line(&alice(), "p1", None).await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));

        let cart = store.clear(&alice()).await.unwrap();
        assert!(cart.is_empty());
        assert_eq!(cart.totals().subtotal, 0);
    }

    #[tokio::test]
    async fn test_apply_coupon_is_idempotent() {
        let store = store();
        store.add_line(&alice(), "p1", None, 2).await.unwrap();

        let once = store.apply_coupon(&alice(), "SAVE10").await.unwrap();
        let twice = store.apply_coupon(&alice(), "SAVE10").await.unwrap();

        assert_eq!(once.totals().coupon_discount, 400);
        assert_eq!(once.totals(), twice.totals());
        assert_eq!(twice.coupons().count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_coupon_rejected() {
        let store = store();
        let err = store.apply_coupon(&alice(), "BOGUS").await.unwrap_err();
        assert!(matches!(err, CheckoutError::UnknownCoupon { .. }));
    }

    #[tokio::test]
    async fn test_coupon_minimum_is_rechecked_on_every_mutation() {
        let store = store();
        store.add_line(&alice(), "p1", None, 3).await.unwrap();
        let cart = store.apply_coupon(&alice(), "FIVEOFF").await.unwrap();
        assert_eq!(cart.totals().coupon_discount, 500);

        let cart = store.update_quantity(&alice(), "p1", None, 2).await.unwrap();
        assert_eq!(cart.totals().coupon_discount, 0);

        let cart = store.remove_coupon(&alice(), "FIVEOFF").await.unwrap();
        assert_eq!(cart.coupons().count(), 0);
    }

    #[tokio::test]
    async fn test_jurisdiction_changes_tax() {
        let store = store();
        store.add_line(&alice(), "p1", None, 5).await.unwrap();
        let cart = store.set_jurisdiction(&alice(), Some("TX".into())).await.unwrap();
        assert_eq!(cart.totals().estimated_tax, 625);
    }

    #[tokio::test]
    async fn test_merge_guest_into_user() {
        let store = store();
        let guest = Identity::guest("sess-1");
        store.add_line(&guest, "p1", None, 2).await.unwrap();
        store.add_line(&guest, "prime", None, 1).await.unwrap();
        store.add_line(&alice(), "p1", None, 29).await.unwrap();

        let merged = store.merge("sess-1", "alice").await.unwrap();

        assert_eq!(merged.lines().len(), 2);
        assert_eq!(merged.lines()[0].quantity, MAX_LINE_QUANTITY);
        assert!(merged.totals().has_prime_items);
        assert_subtotal_invariant(&merged);
        assert!(store.get(&guest).await.is_empty());
    }

    #[tokio::test]
    async fn test_merge_without_guest_cart_returns_user_cart() {
        let store = store();
        store.add_line(&alice(), "p1", None, 1).await.unwrap();
        let merged = store.merge("no-such-session", "alice").await.unwrap();
        assert_eq!(merged.item_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_are_serialized() {
        let store = Arc::new(store());
        let mut tasks = Vec::new();
        for _ in 0..20 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.add_line(&Identity::user("alice"), "p1", None, 1).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let cart = store.get(&alice()).await;
        assert_eq!(cart.lines()[0].quantity, 20);
        assert_subtotal_invariant(&cart);
    }
}
