mod aggregator;
mod ledger;

pub use aggregator::*;
pub use ledger::*;
