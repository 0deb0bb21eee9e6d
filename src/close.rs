//! Close codes carried in the first two payload bytes of a close frame,
//! per [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).

/// Status code explaining why a connection was closed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseCode {
    /// 1000: normal closure, the purpose of the connection was fulfilled.
    Normal,
    /// 1001: endpoint is going away (server shutdown, page navigation).
    Away,
    /// 1002: protocol error.
    Protocol,
    /// 1003: received a data type it cannot accept.
    Unsupported,
    /// 1007: received data inconsistent with the message type.
    InvalidPayload,
    /// 1008: received a message violating its policy.
    Policy,
    /// 1009: message too big to process.
    Size,
    /// 1011: server encountered an unexpected condition.
    Error,
    /// Any other code, preserved verbatim.
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1003 => Self::Unsupported,
            1007 => Self::InvalidPayload,
            1008 => Self::Policy,
            1009 => Self::Size,
            1011 => Self::Error,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::InvalidPayload => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Error => 1011,
            CloseCode::Other(other) => other,
        }
    }
}
