use bitflags::bitflags;

/// `O_SESSION`: the open-flag bit that requests session semantics.
const O_SESSION: u32 = 0o40;

bitflags! {
    /// Flags a handle is opened with.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        /// Handle may be read.
        const READ = 0x1;
        /// Handle may be written; required to commit a session.
        const WRITE = 0x2;
        /// Create the file if it does not exist.
        const CREATE = 0x4;
        /// Truncate the file to zero length on open.
        const TRUNCATE = 0x8;
        /// Redirect I/O to a private buffer until close.
        const SESSION = O_SESSION;
        /// Negative positions are treated as large unsigned offsets.
        const UNSIGNED_OFFSET = 0x100;
    }
}

impl OpenFlags {
    pub fn read_write() -> Self {
        OpenFlags::READ | OpenFlags::WRITE
    }

    pub fn wants_session(&self) -> bool {
        self.contains(OpenFlags::SESSION)
    }

    /// `std::fs::OpenOptions` matching these flags.
    pub fn to_open_options(&self) -> std::fs::OpenOptions {
        let mut options = std::fs::OpenOptions::new();
        options
            .read(self.contains(OpenFlags::READ))
            .write(self.contains(OpenFlags::WRITE))
            .create(self.contains(OpenFlags::CREATE))
            .truncate(self.contains(OpenFlags::TRUNCATE));
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_bit() {
        assert_eq!(OpenFlags::SESSION.bits(), 0o40);
        assert!((OpenFlags::read_write() | OpenFlags::SESSION).wants_session());
        assert!(!OpenFlags::read_write().wants_session());
    }

    #[test]
    fn test_bits_are_distinct() {
        let all = [
            OpenFlags::READ,
            OpenFlags::WRITE,
            OpenFlags::CREATE,
            OpenFlags::TRUNCATE,
            OpenFlags::SESSION,
            OpenFlags::UNSIGNED_OFFSET,
        ];
        let combined = all.iter().fold(OpenFlags::empty(), |acc, f| acc | *f);
        assert_eq!(combined.bits().count_ones() as usize, all.len());
    }
}
