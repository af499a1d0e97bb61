//! 具体的渲染面（RenderDelegate 实现）

pub mod console;
pub mod now_playing;

pub use console::ConsoleRenderer;
pub use now_playing::{NowPlayingController, NowPlayingInfo};
