//! # Facturio Mailer
//!
//! The outbound side of the system: an async SMTP implementation of the
//! core `MailTransport` trait and a plain-text implementation of the
//! `DocumentRenderer` trait for invoice attachments.

pub mod render;
pub mod smtp;

pub use render::TextDocumentRenderer;
pub use smtp::SmtpMailer;
