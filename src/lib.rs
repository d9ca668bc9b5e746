// src/lib.rs
pub mod db;
pub mod matching;
pub mod models;
pub mod oracle;
pub mod utils;
