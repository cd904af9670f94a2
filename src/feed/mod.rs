mod fetcher;
mod opml;

pub use fetcher::FeedFetcher;
pub use opml::parse_opml_file;
