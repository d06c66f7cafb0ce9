pub mod config;
pub mod config_data;
pub mod error;
pub mod front_matter;
pub mod git;
pub mod lock;
pub mod logger;
pub mod post;
pub mod repository;
pub mod server;
pub mod store;
pub mod text_utils;
mod paginator;
mod post_list;
mod query_string;

pub mod util {
    pub mod os_helper;
    pub mod toml_date;
}

pub use error::{Result, StoreError};
pub use store::ContentStore;
