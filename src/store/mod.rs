pub mod ledger_file;
pub mod repo;
