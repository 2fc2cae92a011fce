// src/session/mod.rs

pub mod bounce;

pub use bounce::render_to_wav;
