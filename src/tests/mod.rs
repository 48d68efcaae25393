mod admin;
mod content;
mod helper;
mod session;
