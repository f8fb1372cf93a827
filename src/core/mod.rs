pub mod app;
pub mod cache;
pub mod data;
pub mod fragments;
pub mod functions;
