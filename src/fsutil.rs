use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Write `contents` to `path` through a sibling temp file and a rename, so
/// readers see either the old file or the new one.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let temp_path = path.with_extension("tmp");
    let result = (|| {
        let mut file = fs::File::create(&temp_path)?;
        file.write_all(contents)?;
        // Data must hit the disk before the rename makes it visible.
        file.sync_all()?;
        drop(file);
        fs::rename(&temp_path, path)
    })();
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}
