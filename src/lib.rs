//! Terminal flappy-bird steered by a MIDI piano.
//!
//! The frame loop lives in the binary; everything it drives is here so the
//! game can be exercised without a terminal or a keyboard attached.

pub mod config;
pub mod error;
pub mod game;
pub mod mapper;
pub mod midi;
pub mod physics;
pub mod render;
pub mod theory;
pub mod tracking;
