#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

//! Live provider and virtual key configuration
//!
//! [`ConfigStore`] caches the three configuration relations and reloads
//! them selectively as [`ChangeListener`] delivers change notifications.

mod coalesce;
mod error;
mod event;
mod listener;
mod postgres;
mod source;
mod store;

pub use error::StoreError;
pub use event::{ConfigChangeEvent, Operation, ResourceKind};
pub use listener::{Backoff, ChangeHandler, ChangeListener, ListenerHandle, NotificationSource};
pub use postgres::{PgNotifications, PostgresSource};
pub use source::{ApiKeyRecord, ConfigSource, MemorySource, ProviderRecord};
pub use store::{ConfigStore, StoreCounts};
