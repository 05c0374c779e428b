pub mod auth;
pub mod chat;
pub mod playlists;
pub mod problems;
pub mod submissions;
