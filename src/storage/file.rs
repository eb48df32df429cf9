/// Access requested from the handle cache.
///
/// A slot opened for `ReadWrite` also serves reads; a `Read` slot never
/// serves writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileAccess {
    Read,
    ReadWrite,
}

impl FileAccess {
    pub fn can_write(self) -> bool {
        matches!(self, FileAccess::ReadWrite)
    }
}

/// How a file is brought to its declared length when first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllocationMode {
    /// Set the length without writing; the filesystem keeps holes sparse.
    #[default]
    Sparse,
    /// Write zeroes up to the declared length.
    Full,
}
