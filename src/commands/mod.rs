mod db;
mod sites;

pub use db::{run_db_start, run_db_status, run_db_stop};
pub use sites::{run_create, run_delete, run_list, run_up};
