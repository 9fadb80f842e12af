pub mod directory;
pub mod patterns;
pub mod scanner;

pub use directory::CentralDirectory;
pub use patterns::{classify_entry_name, EntryClass, ENTRY_PATTERNS};
pub use scanner::{ArchiveScanner, TestcaseArchive};
