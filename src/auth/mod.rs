//! Identity: password registration and login, and session tokens that map a
//! request to the user behind it.

pub mod handlers;
pub mod session;
