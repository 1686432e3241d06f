pub mod badge;
pub mod community;
pub mod models;
pub mod presence;
pub mod recent_chat;
pub mod session;
pub mod validation;
