#![forbid(unsafe_code)]

//! Bitsets shared between the fetcher, the reconciler and the host.

use bitflags::bitflags;

use crate::event::Channel;

bitflags! {
    /// What happened while serving one text request.
    ///
    /// Lets callers tell "got everything" apart from "got a truncated but
    /// still useful answer".
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct LoadFlags: u16 {
        /// At least one host call was issued.
        const REQUESTED = 1 << 0;
        /// Some of the returned text came straight from the host.
        const LOADED_FRESH = 1 << 1;
        /// The cache gained or changed content.
        const UPDATED_CACHE = 1 << 2;
        /// A cached entry disagreed with the host and was rewritten.
        const CORRECTED_STALE = 1 << 3;
        /// A cached entry turned out not to exist on the host and was dropped.
        const REMOVED_STALE = 1 << 4;
        /// The selection had to be resolved before reading.
        const SELECTION_LOADED = 1 << 5;
        /// Resolving the selection moved it away from what was assumed.
        const SELECTION_UPDATED = 1 << 6;
        /// Every segment got the full requested length or hit the document boundary.
        const FULL_REQUEST_COMPLETED = 1 << 7;
    }
}

bitflags! {
    /// Flags passed along with host text reads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TextRequestFlags: u8 {
        /// Ask for styled text. Styling is opaque, so such reads always go
        /// to the host and are never cached.
        const STYLED = 1 << 0;
    }
}

bitflags! {
    /// Set of notification channels.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelSet: u8 {
        const SELECTION = 1 << 0;
        const EXTRACTED_TEXT = 1 << 1;
    }
}

impl ChannelSet {
    #[must_use]
    pub const fn of(channel: Channel) -> Self {
        match channel {
            Channel::Selection => Self::SELECTION,
            Channel::ExtractedText => Self::EXTRACTED_TEXT,
        }
    }
}
