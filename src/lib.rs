pub mod api;
pub mod database;
pub mod edgar;
pub mod models;
pub mod reconcile;
pub mod reference;
pub mod update_log;
pub mod updater;
pub mod utils;
