//! tg-forwarder: a Telegram message-forwarding engine — replicates
//! messages, media and albums between channels with history-backed
//! at-most-once delivery.

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
