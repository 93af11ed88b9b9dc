//! Core types for mockvox: the realtime wire protocol, PCM payload codec,
//! error taxonomy, configuration, and the read-only interview content store.

pub mod config;
pub mod content;
pub mod error;
pub mod pcm;
pub mod protocol;
