use std::time::Duration;

/// Tunables for a `MuxSession` (spec §4.4). Both ends of a session are
/// expected to run compatible defaults; nothing here is negotiated on the
/// wire.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
    pub max_frame_size: usize,
    pub max_receive_buffer: usize,
    pub max_stream_buffer: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(30),
            max_frame_size: 32 * 1024,
            max_receive_buffer: 4 * 1024 * 1024,
            max_stream_buffer: 64 * 1024,
        }
    }
}
