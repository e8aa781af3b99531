pub mod alphavantage;
pub mod finnhub;
pub mod polygon;
pub mod provider;
pub mod rate_tracker;
pub mod registry;
pub mod yfinance;
