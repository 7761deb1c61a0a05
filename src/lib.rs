pub mod auth;
pub mod collab;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod limits;
pub mod membership;
pub mod model;
pub mod notify;
pub mod observability;
pub mod qr;
pub mod sql;
pub mod sweeper;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
