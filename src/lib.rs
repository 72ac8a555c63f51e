pub mod analyzers;
pub mod collector;
pub mod config;
pub mod fetch;
pub mod infra;
pub mod model;
pub mod normalize;
pub mod output;
pub mod parser;
pub mod services;
pub mod store;
pub mod tracker;
