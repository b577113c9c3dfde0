pub mod config;
pub mod dbt;
pub mod fetch;
pub mod history;
pub mod load;
pub mod logging;
pub mod pipeline;
pub mod process;
pub mod tables;
pub mod validate;
