pub mod api;
pub mod auth_service;
pub mod config;
pub mod link_repo;
pub mod link_service;
pub mod session;
pub mod user_repo;
pub mod views;
pub mod web;
