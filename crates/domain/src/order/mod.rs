//! Order aggregate and related types.

mod aggregate;
mod state;
mod value_objects;

pub use aggregate::Order;
pub use state::OrderStatus;
pub use value_objects::{Money, OrderLine};

use thiserror::Error;

/// Errors that can occur during order operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrderError {
    /// Order is not in the expected status.
    #[error("Invalid status transition: cannot {action} from {current_status} status")]
    InvalidStatusTransition {
        current_status: OrderStatus,
        action: &'static str,
    },

    /// Invalid quantity.
    #[error("Invalid quantity for {product_code}: {quantity} (must be greater than 0)")]
    InvalidQuantity { product_code: String, quantity: u32 },

    /// Invalid price.
    #[error("Invalid price for {product_code}: {price} (must not be negative)")]
    InvalidPrice { product_code: String, price: i64 },

    /// The order total does not fit the money representation.
    #[error("Order total overflows")]
    TotalOverflow,

    /// Order has no line items.
    #[error("Order has no items")]
    NoItems,
}
