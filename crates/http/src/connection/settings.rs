use crate::engine::Setting;

/// Settings a connection advertises in its preface, fixed for its lifetime.
///
/// The window and frame sizes are left to the protocol defaults unless set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Http2Settings {
    pub max_concurrent_streams: u32,
    pub enable_push: bool,
    pub initial_window_size: Option<u32>,
    pub max_frame_size: Option<u32>,
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self { max_concurrent_streams: 4, enable_push: false, initial_window_size: None, max_frame_size: None }
    }
}

impl Http2Settings {
    #[must_use]
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.max_concurrent_streams = max;
        self
    }

    #[must_use]
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.initial_window_size = Some(size);
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    pub(crate) fn to_settings(self) -> Vec<Setting> {
        let mut settings = vec![Setting::MaxConcurrentStreams(self.max_concurrent_streams), Setting::EnablePush(self.enable_push)];
        settings.extend(self.initial_window_size.map(Setting::InitialWindowSize));
        settings.extend(self.max_frame_size.map(Setting::MaxFrameSize));
        settings
    }
}
