//! # Catalog Collaborator
//!
//! The checkout core never owns product data. It asks a [`Catalog`] for a
//! product once, at line-add time, and snapshots what it needs into the
//! cart line. Products for the bundled implementation are loaded from
//! `config/products.toml`.

use crate::error::CheckoutResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Product data the cart snapshots at add time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogProduct {
    /// Opaque product identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Current selling price (minor units)
    pub price: i64,

    /// List price before markdown (minor units); defaults to `price`
    #[serde(default)]
    pub original_price: Option<i64>,

    /// Units available
    #[serde(default)]
    pub stock: u32,

    /// Prime-eligible lines always ship free
    #[serde(default)]
    pub is_prime: bool,

    /// Line ships free on its own
    #[serde(default)]
    pub is_free_shipping: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Whether this product can currently be purchased
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl CatalogProduct {
    /// Create a product with the given price and stock
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: i64, stock: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            original_price: None,
            stock,
            is_prime: false,
            is_free_shipping: false,
            image: None,
            brand: None,
            category: None,
            active: true,
        }
    }

    /// Builder: set the pre-markdown list price
    pub fn with_original_price(mut self, original_price: i64) -> Self {
        self.original_price = Some(original_price);
        self
    }

    /// Builder: mark as prime-eligible
    pub fn prime(mut self) -> Self {
        self.is_prime = true;
        self
    }

    /// Builder: mark as individually free-shipping
    pub fn free_shipping(mut self) -> Self {
        self.is_free_shipping = true;
        self
    }

    /// List price, falling back to the selling price
    pub fn list_price(&self) -> i64 {
        self.original_price.unwrap_or(self.price)
    }
}

/// Read-only product lookup consulted by the cart store
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Look up a product by id. `Ok(None)` means the id is unknown.
    async fn product(&self, product_id: &str) -> CheckoutResult<Option<CatalogProduct>>;
}

/// In-memory catalog (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductCatalog {
    #[serde(default)]
    pub products: Vec<CatalogProduct>,
}

impl ProductCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a product to the catalog
    pub fn add(&mut self, product: CatalogProduct) {
        self.products.push(product);
    }

    /// Builder: add a product
    pub fn with_product(mut self, product: CatalogProduct) -> Self {
        self.add(product);
        self
    }

    /// Find a product by ID
    pub fn get(&self, id: &str) -> Option<&CatalogProduct> {
        self.products.iter().find(|p| p.id == id)
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

#[async_trait]
impl Catalog for ProductCatalog {
    async fn product(&self, product_id: &str) -> CheckoutResult<Option<CatalogProduct>> {
        Ok(self.get(product_id).filter(|p| p.active).cloned())
    }
}
