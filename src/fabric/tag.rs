//! Message tags and tag matching.

/// A 64-bit message tag carried with every tagged send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Tag(pub u64);

impl From<u64> for Tag {
    fn from(tag: u64) -> Self {
        Self(tag)
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Selects which tag bits a posted receive compares.
///
/// A set bit must be equal in the sender tag and the expected tag; a clear bit
/// is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagMask(pub u64);

impl TagMask {
    /// Every bit is compared.
    pub const FULL: TagMask = TagMask(u64::MAX);
    /// No bit is compared; any tag matches.
    pub const ANY: TagMask = TagMask(0);

    /// Whether a message sent with `sender` satisfies a receive posted for `expected`.
    pub fn matches(&self, sender: Tag, expected: Tag) -> bool {
        (sender.0 ^ expected.0) & self.0 == 0
    }
}

impl Default for TagMask {
    fn default() -> Self {
        TagMask::FULL
    }
}
