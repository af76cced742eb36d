use std::fmt;

/// Pipeline stage a queued item is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Fetch,
    DecodeWrite,
}

impl Track {
    pub const ALL: [Track; 2] = [Track::Fetch, Track::DecodeWrite];

    pub(crate) const fn slot(self) -> usize {
        match self {
            Track::Fetch => 0,
            Track::DecodeWrite => 1,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Track::Fetch => "FETCH",
            Track::DecodeWrite => "DECODE_WRITE",
        }
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
