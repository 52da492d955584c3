pub mod activity;
pub mod browser;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod models;
pub mod offers;
pub mod reconcile;
pub mod runner;
pub mod site;
pub mod store;
