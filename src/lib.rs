//! Subqueue - Batch Subtitle Generation Pipeline
//!
//! Queues media files and runs each one through audio extraction,
//! whisper.cpp transcription, optional Ollama translation and SRT emission
//! on a background task, reporting progress, ETA and per-file outcomes as
//! events.

pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod orchestrator;
pub mod progress;
pub mod queue;
pub mod segment;
pub mod subtitle;
pub mod throttle;
pub mod transcribe;
pub mod translate;
