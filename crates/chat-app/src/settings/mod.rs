pub mod state;

pub use state::{Settings, SettingsLoad, SettingsOrigin, SettingsStore};
