pub mod config;
pub mod domain;
pub mod errors;
pub mod registry;

pub use domain::website::{PluginSettings, SettingsError, WebsiteEntry, WebsiteId};
pub use errors::{ApplicationError, InterfaceError};
pub use registry::{RegistryError, WebsiteRegistry};
