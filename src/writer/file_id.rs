//! File id allocation for image sets

use std::collections::HashSet;
use std::path::PathBuf;

use crate::writer::image_set::manifest_name;

/// Answers whether an image set id is already used in storage.
pub trait IdProbe: Send {
    fn is_taken(&self, id: u32) -> bool;
}

/// Looks for an existing `img_NNNN.xml` manifest in the output directory.
#[derive(Debug, Clone)]
pub struct DirectoryProbe {
    dir: PathBuf,
}

impl DirectoryProbe {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl IdProbe for DirectoryProbe {
    fn is_taken(&self, id: u32) -> bool {
        self.dir.join(manifest_name(id)).exists()
    }
}

/// In-memory id set, for running without a filesystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryProbe {
    pub taken: HashSet<u32>,
}

impl MemoryProbe {
    pub fn with_taken(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            taken: ids.into_iter().collect(),
        }
    }
}

impl IdProbe for MemoryProbe {
    fn is_taken(&self, id: u32) -> bool {
        self.taken.contains(&id)
    }
}

/// Hands out image set ids, skipping any the probe reports as taken.
///
/// Ids are unique and increasing for the allocator's lifetime. `set_free_id`
/// may move the counter forward; a hint below an id already handed out is
/// raised past it, since that set may not have reached storage yet.
pub struct FileIdAllocator {
    free_id: u32,
    /// One past the highest id handed out
    issued: u32,
    probe: Box<dyn IdProbe>,
}

impl FileIdAllocator {
    pub fn new(probe: Box<dyn IdProbe>) -> Self {
        Self {
            free_id: 0,
            issued: 0,
            probe,
        }
    }

    pub fn for_directory(dir: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(DirectoryProbe::new(dir)))
    }

    pub fn set_free_id(&mut self, id: u32) {
        self.free_id = id.max(self.issued);
    }

    pub fn allocate(&mut self) -> u32 {
        while self.probe.is_taken(self.free_id) {
            self.free_id += 1;
        }
        let id = self.free_id;
        self.free_id += 1;
        self.issued = self.free_id;
        id
    }
}

impl std::fmt::Debug for FileIdAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileIdAllocator")
            .field("free_id", &self.free_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_taken_ids() {
        let mut ids = FileIdAllocator::new(Box::new(MemoryProbe::with_taken(0..5)));
        assert_eq!(ids.allocate(), 5);
        assert_eq!(ids.allocate(), 6);
    }

    #[test]
    fn test_reset_never_reissues_an_id() {
        let mut ids = FileIdAllocator::new(Box::new(MemoryProbe::with_taken([0, 1, 3])));
        assert_eq!(ids.allocate(), 2);
        assert_eq!(ids.allocate(), 4);

        ids.set_free_id(0);
        assert_eq!(ids.allocate(), 5);
    }

    #[test]
    fn test_reset_before_sets_reach_storage() {
        // Nothing on disk yet: only the allocator knows ids 0 and 1 are used
        let mut ids = FileIdAllocator::new(Box::new(MemoryProbe::default()));
        assert_eq!(ids.allocate(), 0);
        assert_eq!(ids.allocate(), 1);

        ids.set_free_id(0);
        assert_eq!(ids.allocate(), 2);
    }

    #[test]
    fn test_forward_hint_is_honored() {
        let mut ids = FileIdAllocator::new(Box::new(MemoryProbe::default()));
        assert_eq!(ids.allocate(), 0);
        ids.set_free_id(40);
        assert_eq!(ids.allocate(), 40);
        assert_eq!(ids.allocate(), 41);
    }

    #[test]
    fn test_directory_probe() {
        let dir = tempfile::tempdir().unwrap();
        for id in 0..5 {
            std::fs::write(dir.path().join(manifest_name(id)), b"").unwrap();
        }
        let mut ids = FileIdAllocator::for_directory(dir.path());
        assert_eq!(ids.allocate(), 5);
    }
}
