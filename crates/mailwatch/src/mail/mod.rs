//! Mail source module.
//!
//! The polling core only sees the [`MailClient`] capability. [`ImapMailClient`]
//! is the production implementation: read-only IMAP over implicit TLS that
//! returns the recent headers of one folder.

pub mod client;
pub mod error;
pub mod headers;
pub mod imap;
pub mod message;
pub mod window;

pub use client::{MailClient, SessionOptions};
pub use error::MailError;
pub use headers::parse_header_block;
pub use imap::ImapMailClient;
pub use message::MessageHeader;
pub use window::{RecentWindow, WindowStep};
