pub mod page_manager;

pub use page_manager::{PageManager, PAGE_SIZE};

use std::path::{Path, PathBuf};

/// `base` with `suffix` appended to its file name, e.g. `data/tide` + `.db`.
pub fn sibling_file(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}
