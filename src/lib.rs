#![doc = include_str!("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod error;
mod log;
pub mod platform;
mod raw;

mod decode;
mod encode;
mod time;

extern crate alloc;

pub use decode::{ByteSource, DecodeSummary, Decoder, Sample, SampleSink, StopReason, StreamType};
pub use encode::Encoder;
pub use error::Error;
pub use log::{LoadResult, LogStats, SampleLog};
pub use time::Timestamp;
