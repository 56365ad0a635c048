pub mod aggregate;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod fetch;
pub mod live;
pub mod model;
pub mod output;
pub mod overlay;
pub mod parser;
pub mod scope;
