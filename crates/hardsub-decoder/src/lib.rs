pub mod backends;
pub mod config;
pub mod core;

pub use backends::mock::{MockOverlay, MockProvider, MockScript};
pub use config::{Backend, Configuration};
pub use core::{
    DynFrameProvider, FrameError, FrameResult, FrameStream, FrameStreamProvider, LumaFrame,
    VideoMetadata, spawn_stream_from_channel,
};
