mod config;
mod paths;

pub use config::{
    load_settings, save_settings, AppSettings, ANON_KEY_ENV, BACKEND_URL_ENV, DEFAULT_BACKEND_URL,
};
pub use paths::DataDir;
