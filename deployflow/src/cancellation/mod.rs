//! Cooperative cancellation for operator interrupts.

mod token;

pub use token::CancellationToken;
