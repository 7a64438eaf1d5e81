//! Per-session turn state machine
//!
//! ```text
//!   Idle ──recording_start──▶ Recording ──audio_complete──▶ Processing
//!    ▲  └──────────────audio_complete─────────────────────────▶ │
//!    └──────────────────── turn finished / aborted ─────────────┘
//!   any ──disconnect──▶ Closed
//! ```

use std::fmt;

use chrono::Utc;

/// Client-visible correlation token minted at each recording start
///
/// Unix milliseconds, strictly increasing within one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnToken(i64);

impl TurnToken {
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TurnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Mints monotonically increasing turn tokens from the wall clock
#[derive(Debug, Default)]
pub struct TokenMint {
    last: Option<i64>,
}

impl TokenMint {
    /// Mint a token from the current time
    pub fn mint(&mut self) -> TurnToken {
        self.mint_at(Utc::now().timestamp_millis())
    }

    /// Mint a token for `now_ms`, bumping past the previous one if the clock
    /// has not advanced
    pub fn mint_at(&mut self, now_ms: i64) -> TurnToken {
        let next = match self.last {
            Some(last) if now_ms <= last => last + 1,
            _ => now_ms,
        };
        self.last = Some(next);
        TurnToken(next)
    }
}

/// Where a session is in its turn lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// Connected, no turn in progress
    Idle,
    /// Client signalled start and is recording locally
    Recording { token: TurnToken },
    /// A clip was accepted and the pipeline is running
    Processing { token: Option<TurnToken> },
    /// Socket gone; nothing is accepted any more
    Closed,
}

/// Result of handling `recording_start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartRecording {
    /// Normal `Idle -> Recording`
    Started,
    /// Already recording; token replaced
    Restarted,
    /// A turn is running; token replaced but the turn keeps going
    DuringProcessing,
    /// Session closed; ignored
    Rejected,
}

/// Result of handling `audio_complete`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptClip {
    /// Clip accepted; pipeline may start
    Accepted { token: Option<TurnToken> },
    /// A turn is already in flight
    Busy,
    /// Session closed
    Closed,
}

impl TurnState {
    /// Apply a `recording_start` with a freshly minted token
    pub fn start_recording(&mut self, token: TurnToken) -> StartRecording {
        match *self {
            Self::Idle => {
                *self = Self::Recording { token };
                StartRecording::Started
            }
            Self::Recording { .. } => {
                *self = Self::Recording { token };
                StartRecording::Restarted
            }
            Self::Processing { .. } => {
                *self = Self::Processing { token: Some(token) };
                StartRecording::DuringProcessing
            }
            Self::Closed => StartRecording::Rejected,
        }
    }

    /// Apply an `audio_complete`; only `Idle` and `Recording` accept a clip
    pub fn accept_clip(&mut self) -> AcceptClip {
        match *self {
            Self::Idle => {
                *self = Self::Processing { token: None };
                AcceptClip::Accepted { token: None }
            }
            Self::Recording { token } => {
                *self = Self::Processing { token: Some(token) };
                AcceptClip::Accepted { token: Some(token) }
            }
            Self::Processing { .. } => AcceptClip::Busy,
            Self::Closed => AcceptClip::Closed,
        }
    }

    /// The running turn ended, successfully or not
    pub fn finish_turn(&mut self) {
        if matches!(self, Self::Processing { .. }) {
            *self = Self::Idle;
        }
    }

    /// Terminal transition
    pub fn close(&mut self) {
        *self = Self::Closed;
    }

    #[must_use]
    pub const fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }

    /// Short name for logs
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording { .. } => "recording",
            Self::Processing { .. } => "processing",
            Self::Closed => "closed",
        }
    }
}
