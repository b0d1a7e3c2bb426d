//! # rassist-agent
//!
//! Runs on the assisted machine. Listens for one viewer at a time,
//! streams the primary display as JPEG frames and replays the mouse and
//! keyboard commands the viewer sends back.
//!
//! Screen capture and input injection use DXGI Desktop Duplication and
//! `SendInput`, so the agent only starts on Windows.

pub mod config;
