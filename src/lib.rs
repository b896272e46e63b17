pub mod app;
pub mod config;
pub mod detector;
pub mod error;
pub mod face;
pub mod gateway;
pub mod overlay;
pub mod scoring;
pub mod settings;
pub mod shapes;
pub mod ui;
pub mod video;
