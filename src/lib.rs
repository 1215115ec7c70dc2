pub mod authority;
pub mod client;
pub mod clock;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod participant;
pub mod playback;
pub mod storage;
pub mod web_interface;

pub use controller::Controller;
