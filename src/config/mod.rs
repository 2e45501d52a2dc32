pub mod settings;

pub use settings::{resolve_secret, Settings};
