pub mod deviation_bucket;
pub mod environment;
pub mod fetch_task;
pub mod processing_status;
pub mod threshold;
pub mod trade_record;
