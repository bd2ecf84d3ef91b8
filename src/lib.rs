pub mod config;
pub mod convert;
pub mod correct;
pub mod error;
pub mod executor;
pub mod fetch;
pub mod pipeline;
pub mod publish;
pub mod schema;
pub mod stage;
pub mod storage;
pub mod testmode;
pub mod validate;
pub mod warehouse;

#[cfg(test)]
pub(crate) mod testutil;
