//! Delayed notification scheduling and dispatch.
//!
//! Notifications are stored with a future `send_for`, released onto a queue
//! by the [`Scheduler`] when due, and delivered over their channels by the
//! [`Dispatcher`]. Backends plug in through [`NotificationStore`],
//! [`NotificationCache`] and [`NotificationQueue`].

pub mod adapters;
pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod memory;
pub mod queue;
pub mod repository;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod store;
pub mod transition;
pub mod types;

pub use adapters::{
    ChannelRegistry, ChannelSender, EmailAdapter, EmailConfig, SendReceipt, TelegramAdapter,
    TelegramConfig, WebhookAdapter, WebhookConfig,
};
pub use cache::{NoopCache, NotificationCache, cache_key};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{NotificationError, Result};
pub use queue::{Delivery, NotificationQueue};
pub use repository::NotificationRepository;
pub use retry::{RetryOutcome, RetryPolicy};
pub use scheduler::{Scheduler, TickReport};
pub use service::{DefaultNotificationService, NotificationService};
pub use store::NotificationStore;
pub use transition::Transition;
pub use types::*;
