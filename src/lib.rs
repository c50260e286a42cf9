pub mod agent;
pub mod app;
pub mod constants;
pub mod errors;
pub mod managers;
pub mod model;
pub mod providers;
pub mod services;
pub mod stores;
