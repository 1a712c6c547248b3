pub mod batch;
pub mod config;
pub mod diary;
pub mod dispatch;
pub mod error;
pub mod response;
pub mod server;
pub mod service;
pub mod storage;
pub mod transfer;
