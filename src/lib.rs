#![forbid(unsafe_code)]

pub mod config;
pub mod datamodel;
pub mod storage;
