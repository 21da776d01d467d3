pub mod config;
pub mod error;
pub mod events;
pub mod intent;
pub mod ledger;
pub mod naming;
pub mod verdict;
