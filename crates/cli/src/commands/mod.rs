pub mod chat;
pub mod classify;
pub mod init;
pub mod session;
pub mod verify;
