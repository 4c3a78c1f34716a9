// src/notify/mod.rs

pub mod channels;
pub mod manager;

pub use manager::{NotificationManager, NotifyConfig};
