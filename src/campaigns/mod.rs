//! Adapters for the web application's campaign module.

pub mod http;
pub mod memory;

pub use http::HttpCampaignClient;
pub use memory::InMemoryCampaigns;
