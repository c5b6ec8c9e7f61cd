pub mod admin;
pub mod analytics;
pub mod health;
pub mod orders;
