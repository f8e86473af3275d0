/// Opaque handle issued by a server.
///
/// `Rid::INVALID` is what a server returns when it cannot allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Rid(u64);

impl Rid {
    pub const INVALID: Rid = Rid(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}
