pub mod bucketizer;
pub mod fetch_scheduler;
pub mod impact;
pub mod matcher;
pub mod threshold_table;
