pub mod ai;
pub mod artifacts;
pub mod backtest;
pub mod commands;
pub mod config;
pub mod market;
pub mod notify;
pub mod sandbox;
pub mod storage;
pub mod synth;
