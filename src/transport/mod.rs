//! How jobs arrive and how their outcomes leave.

pub mod http;
mod payload;
mod publisher;

pub use payload::{CompletionRecord, FailurePayload, INTERNAL_ERROR_MESSAGE, JobOutcome};
pub use publisher::{
    DeliveryReceipt, ImmediateReceipt, LogPublisher, ResultPublisher, TransportError,
    WebhookPublisher,
};
