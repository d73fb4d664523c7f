pub mod config;
pub mod docs;
pub mod scraper;

pub use config::Config;
pub use scraper::Scraper;
