//! Notification fan-out and delivery.
//!
//! - [`FanoutRouter`] turns a trigger into one rendered message per channel
//! - [`Dispatcher`] delivers messages concurrently with retry and timeout
//! - [`DeliveryWorker`] runs the dispatcher against the bus
//!
//! Channel senders: SMTP email via `lettre`, SMS and PUSH through HTTP
//! gateways.

pub mod dispatcher;
pub mod email;
pub mod gateway;
pub mod router;
pub mod templating;
pub mod traits;
pub mod validate;
pub mod worker;

pub use dispatcher::{ChannelOutcome, DispatchReport, Dispatcher};
pub use email::EmailSender;
pub use gateway::HttpGatewaySender;
pub use router::{truncate_at_word, ChannelFailure, FanoutRouter, RouteOutcome};
pub use templating::{TemplateContext, TemplateRenderer};
pub use traits::{ChannelSender, NotifyError};
pub use worker::DeliveryWorker;
