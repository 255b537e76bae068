//! API route handlers

pub mod chains;
pub mod fees;
pub mod health;
