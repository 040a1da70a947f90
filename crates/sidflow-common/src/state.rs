/// Playback state of a rendering session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Session is stopped (at beginning or end).
    #[default]
    Stopped,
    /// Session is actively producing audio.
    Playing,
    /// Session is paused (can resume).
    Paused,
}
