pub mod backoff;
pub mod checker;
pub mod ledger;
pub mod scheduler;
pub mod sweeper;
