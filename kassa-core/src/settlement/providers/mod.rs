//! Concrete [`PaymentProvider`](super::provider::PaymentProvider) adapters.

pub mod paystack;
pub mod stripe;
pub mod wise;

pub use paystack::PaystackProvider;
pub use stripe::StripeProvider;
pub use wise::WiseProvider;
