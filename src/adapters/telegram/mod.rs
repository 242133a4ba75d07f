//! Telegram gateway adapter. `client` implements `TgGateway` over grammers;
//! `auth_adapter` implements `AuthPort`; `mapper` and `session` are shared
//! helpers between the two.

pub mod auth_adapter;
pub mod client;
pub mod mapper;
pub mod session;

pub use auth_adapter::GrammersAuthAdapter;
pub use client::GrammersTgGateway;
pub use session::open_file_session;
