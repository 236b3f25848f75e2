//! Session mode flags

use bitflags::bitflags;

bitflags! {
    /// Behavior switches of a session nesting level
    ///
    /// A nested level's mode is the union of its own flags and the enclosing
    /// level's mode. Flags are never cleared by a child.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SessionMode: u32 {
        /// Do not raise `Error::Session` when the session ends with errors
        const SILENT = 1 << 0;
        /// Skip constraint validation at commit
        const SKIP_CONSTRAINTS = 1 << 1;
        /// The session is loading schema definitions
        const LOADING_SCHEMA = 1 << 2;
        /// The session is bulk loading data
        const LOADING = 1 << 3;
    }
}

impl SessionMode {
    /// Plain session: raising, validating
    pub const NORMAL: SessionMode = SessionMode::empty();

    /// Check if errors are kept silent
    pub fn is_silent(self) -> bool {
        self.contains(SessionMode::SILENT)
    }

    /// Check if constraint validation runs at commit
    pub fn checks_constraints(self) -> bool {
        !self.contains(SessionMode::SKIP_CONSTRAINTS)
    }
}
