//! Service layer for the review monitor.
//!
//! This module contains the external collaborators of a run:
//! - Listing parsing (`ListingParser`)
//! - Listing fetching (`HttpSource`, behind `ContentSource`)
//! - Telegram delivery (`TelegramNotifier`, behind `Notifier`)

pub mod notifier;
pub mod parser;
pub mod source;

pub use notifier::{Notifier, TelegramNotifier};
pub use parser::{ListingParser, ParsedPage};
pub use source::{ContentSource, FetchOutcome, HttpSource};
