// Order lifecycle core
pub mod checkout;
pub mod orders;
pub mod payments;

// Side channels
pub mod notifications;
