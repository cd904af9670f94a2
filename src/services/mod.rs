mod content_fetcher;
pub mod extractor;
mod mailer;

pub use content_fetcher::{ContentFetcher, FetchedPage, PageSource};
pub use mailer::{BrevoMailer, Mailer, OutgoingMail};
