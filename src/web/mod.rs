//! HTTP interface: server-rendered pages, form handlers and the JSON API.

mod api;
mod pages;
mod server;
mod session;
pub mod templates;

pub use server::{AppServer, build_router, start_server};
pub use session::{PageUser, session_cookie};
