pub mod access;
pub mod error;
pub mod hedge;
pub mod ledger;
pub mod oracle;
pub mod registry;
pub mod service;
pub mod settlement;
pub mod utils;
