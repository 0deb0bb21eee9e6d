//! Session configuration.

/// Default cap on a single decoded frame payload, 1 MiB.
pub const MAX_PAYLOAD_READ: usize = 1024 * 1024;

/// Default cap on a reassembled message, 2 MiB.
pub const MAX_MESSAGE_SIZE: usize = 2 * 1024 * 1024;

/// Default outbound fragmentation threshold. Payloads above this are split across
/// frames; the value matches the largest payload the 16-bit length tier can carry.
pub const MAX_FRAME_SIZE: usize = 65535;

/// Tunables for a [`crate::WebSocket`] session.
///
/// ```
/// use wirews::Options;
///
/// let options = Options::default()
///     .with_max_payload_read(8 * 1024 * 1024)
///     .with_max_frame_size(16 * 1024);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Inbound frames with a larger payload are rejected (`FrameTooLarge`).
    pub(crate) max_payload_read: usize,
    /// Reassembled messages growing past this are rejected (`FrameTooLarge`).
    pub(crate) max_message_size: usize,
    /// Outbound payloads larger than this are fragmented into chunks of at most this
    /// many bytes.
    pub(crate) max_frame_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_payload_read: MAX_PAYLOAD_READ,
            max_message_size: MAX_MESSAGE_SIZE,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl Options {
    /// Sets the maximum inbound frame payload size.
    pub fn with_max_payload_read(mut self, size: usize) -> Self {
        self.max_payload_read = size;
        self
    }

    /// Sets the maximum reassembled message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Sets the outbound fragmentation threshold. Must be non-zero.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        assert!(size > 0, "max_frame_size must be non-zero");
        self.max_frame_size = size;
        self
    }
}
