mod activity;
pub mod cache;
mod client;
pub mod config;
mod markets;
pub mod models;
mod session;
pub mod streaming;

pub use activity::History;
pub use client::{Broker, X_IG_API_KEY};
pub use config::{ClientConfig, ConfigError, Environment};
pub use markets::{MARKETS_BATCH, Markets, PriceQuery};
pub use session::{OAuthRefresher, Session, SessionDataError};

pub use broker_core::error::{ApiError, ErrorKind};

pub mod prelude {
    pub use crate::cache::{KeyedStore, MemoryStore, PriceCache, PriceKey};
    pub use crate::client::Broker;
    pub use crate::config::{ClientConfig, Environment};
    pub use crate::markets::PriceQuery;
    pub use crate::models::{Activity, Market, PriceBar, PricePage, Resolution};
    pub use crate::streaming::{ChartScale, StreamSession, Streamer, StreamingTransport, Update};
    pub use broker_core::error::{ApiError, ErrorKind};
}
