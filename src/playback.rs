//! Playback widget abstraction
//!
//! Components:
//! - `widget`: the capability surface participants drive (`PlaybackWidget`).
//! - `simulated_player`: an in-process player on the tokio clock.

pub mod simulated_player;
pub mod widget;

pub use simulated_player::SimulatedPlayer;
pub use widget::{PlaybackWidget, WidgetEvent};
