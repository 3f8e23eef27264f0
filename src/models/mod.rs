// Domain value types consumed by the checkout pipeline
pub mod address;
pub mod cart;

pub use address::ShippingAddress;
pub use cart::{Cart, CartItem};
