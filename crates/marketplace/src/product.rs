//! Products and stock.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Money, ProductId, Version};

/// A product listed on the marketplace.
///
/// `in_stock` is unsigned, so the non-negative stock invariant holds by
/// construction; every write goes through a compare-and-swap on `version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    /// Unit price.
    pub price: Money,
    pub in_stock: u32,
    #[serde(default)]
    pub warehouse_address: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub condition: String,
    /// Keys of reservations that took stock and have not been released.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub reservations: BTreeSet<String>,
    /// Store-managed version, bumped on every successful update.
    #[serde(default)]
    pub version: Version,
}

impl Product {
    /// Creates a product with the given price and stock level.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        price: Money,
        in_stock: u32,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            in_stock,
            warehouse_address: String::new(),
            category: String::new(),
            tags: Vec::new(),
            condition: "new".to_string(),
            reservations: BTreeSet::new(),
            version: Version::initial(),
        }
    }

    /// Sets the warehouse address.
    pub fn with_warehouse(mut self, address: impl Into<String>) -> Self {
        self.warehouse_address = address.into();
        self
    }

    /// Returns true if at least `quantity` units are in stock.
    pub fn has_stock(&self, quantity: u32) -> bool {
        self.in_stock >= quantity
    }

    /// Whether the reservation `key` currently holds stock of this product.
    pub fn holds_reservation(&self, key: &str) -> bool {
        self.reservations.contains(key)
    }
}

/// Partial update applied by a compare-and-swap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    pub in_stock: Option<u32>,
    pub price: Option<Money>,
    pub name: Option<String>,
    /// Reservation key to record as holding stock.
    pub hold: Option<String>,
    /// Reservation key whose stock is being returned.
    pub release: Option<String>,
}

impl ProductPatch {
    /// A patch that only sets the stock level.
    pub fn stock(in_stock: u32) -> Self {
        Self {
            in_stock: Some(in_stock),
            ..Self::default()
        }
    }

    /// Sets the stock level and records `key` as holding the difference.
    pub fn reserve(in_stock: u32, key: impl Into<String>) -> Self {
        Self {
            in_stock: Some(in_stock),
            hold: Some(key.into()),
            ..Self::default()
        }
    }

    /// Sets the stock level and clears the hold of `key`.
    pub fn release(in_stock: u32, key: impl Into<String>) -> Self {
        Self {
            in_stock: Some(in_stock),
            release: Some(key.into()),
            ..Self::default()
        }
    }

    /// Applies the patch in place. Does not touch the version.
    pub fn apply(&self, product: &mut Product) {
        if let Some(in_stock) = self.in_stock {
            product.in_stock = in_stock;
        }
        if let Some(price) = self.price {
            product.price = price;
        }
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(key) = &self.hold {
            product.reservations.insert(key.clone());
        }
        if let Some(key) = &self.release {
            product.reservations.remove(key);
        }
    }
}

/// Whether a product can currently be bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AvailabilityStatus {
    ProductAvailable,
    ProductOutOfStock,
}

/// Result of a read-only availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub product_id: ProductId,
    pub in_stock: u32,
    pub status: AvailabilityStatus,
}

impl From<&Product> for Availability {
    fn from(product: &Product) -> Self {
        Self {
            product_id: product.id.clone(),
            in_stock: product.in_stock,
            status: if product.in_stock > 0 {
                AvailabilityStatus::ProductAvailable
            } else {
                AvailabilityStatus::ProductOutOfStock
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_touches_set_fields() {
        let mut product = Product::new("p1", "Laptop", Money::from_cents(99_900), 5);
        ProductPatch::stock(4).apply(&mut product);
        assert_eq!(product.in_stock, 4);
        assert_eq!(product.name, "Laptop");
        assert_eq!(product.price, Money::from_cents(99_900));
    }

    #[test]
    fn patch_tracks_reservation_holds() {
        let mut product = Product::new("p1", "Laptop", Money::from_cents(99_900), 5);
        ProductPatch::reserve(4, "s1/reserve").apply(&mut product);
        assert!(product.holds_reservation("s1/reserve"));
        assert_eq!(product.in_stock, 4);

        ProductPatch::release(5, "s1/reserve").apply(&mut product);
        assert!(!product.holds_reservation("s1/reserve"));
        assert_eq!(product.in_stock, 5);
    }

    #[test]
    fn availability_reflects_stock() {
        let product = Product::new("p1", "Laptop", Money::from_cents(1), 0);
        assert_eq!(
            Availability::from(&product).status,
            AvailabilityStatus::ProductOutOfStock
        );

        let product = Product::new("p2", "Mouse", Money::from_cents(1), 3);
        let availability = Availability::from(&product);
        assert_eq!(availability.status, AvailabilityStatus::ProductAvailable);
        assert_eq!(availability.in_stock, 3);
    }

    #[test]
    fn deserializes_camel_case_document() {
        let json = r#"{
            "id": "p1",
            "name": "Used MacBook Air",
            "price": 79900,
            "inStock": 2,
            "warehouseAddress": "1 Dock Rd",
            "category": "laptops",
            "tags": ["college"],
            "condition": "used"
        }"#;
        let product: Product = serde_json::from_str(json).unwrap();
        assert_eq!(product.in_stock, 2);
        assert_eq!(product.version, Version::initial());
        assert_eq!(product.tags, vec!["college".to_string()]);
    }
}
