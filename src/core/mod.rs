// 核心数据模型与基础设施

pub mod clock;
pub mod error;
pub mod ring;
pub mod types;

pub use clock::MediaClock;
pub use error::{PlayerError, Result};
pub use ring::FrameRing;
pub use types::*;
