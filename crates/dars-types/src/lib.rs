pub mod api;
pub mod events;
pub mod feed;
pub mod models;
