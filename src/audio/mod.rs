//! # Audio Processing Module
//!
//! Frame-level building blocks of the capture → network pipeline.
//!
//! ## Key Components:
//! - **Frames**: Fixed-size mono sample blocks and the assembler that cuts them
//! - **Frame Queue**: Bounded drop-oldest hand-off from the audio thread to the pump
//! - **Encoder**: Float samples to 16-bit little-endian PCM (optionally WAV-framed)
//! - **Voice Activity Gate**: Energy threshold deciding which frames are sent
//! - **Conversion**: Downmix and resampling of device-native formats
//!
//! ## Audio Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM on the wire
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers

pub mod buffer;    // Drop-oldest frame queue
pub mod convert;   // Downmix and resampling
pub mod encoder;   // PCM / WAV encoding
pub mod frame;     // AudioFrame and FrameAssembler
pub mod vad;       // Voice activity gate
