mod handlers;
pub mod helpers;
