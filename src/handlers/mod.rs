// src/handlers/mod.rs
pub mod api;
pub mod auth;
pub mod pages;
pub mod proxy;
