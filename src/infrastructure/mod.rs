pub mod fixture_trade_source;
pub mod http_trade_source;
pub mod trade_source_factory;
