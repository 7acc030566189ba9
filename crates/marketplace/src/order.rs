//! Orders.

use chrono::{DateTime, NaiveDate, Utc};
use common::TransactionId;
use serde::{Deserialize, Serialize};

use crate::{Money, OrderId, ProductId, UserId};

/// Lifecycle of a persisted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A purchase order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub product_id: ProductId,
    #[serde(default)]
    pub product_name: String,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Total charged for the order.
    pub price: Money,
    pub transaction_id: TransactionId,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub delivery_date: NaiveDate,
}

fn default_quantity() -> u32 {
    1
}

/// Partial update for an existing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPatch {
    pub status: Option<OrderStatus>,
    pub delivery_date: Option<NaiveDate>,
}

impl OrderPatch {
    /// A patch that only changes the status.
    pub fn status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Applies the patch in place.
    pub fn apply(&self, order: &mut Order) {
        if let Some(status) = self.status {
            order.status = status;
        }
        if let Some(date) = self.delivery_date {
            order.delivery_date = date;
        }
    }
}
