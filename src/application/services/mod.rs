pub mod reconciliation_service;
