pub mod trade_source;
