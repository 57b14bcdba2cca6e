pub mod events;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod settings;
pub mod store;
