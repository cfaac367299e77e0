pub mod api;
pub mod coordinator;
pub mod fetcher;
pub mod ledger;
pub mod models;
pub mod progress;
pub mod resolver;
pub mod settings;
pub mod sink;
pub mod template;
pub mod twitch;
