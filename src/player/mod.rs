// 播放编排层

pub mod audio_output;
pub mod decoder;
pub mod manager;

pub use audio_output::{AudioDevice, AudioScheduler, CpalAudioOutput, OfflineAudioDevice, ScheduleOutcome};
pub use decoder::{
    AudioDecoder, AudioDecoderConfig, DecoderSupport, VideoDecoder, VideoDecoderConfig,
};
pub use manager::PlaybackManager;
