pub mod history;
pub mod journal;
pub mod schedule_file;
pub mod schedule_store;
pub mod state_file;

pub use history::{ExecutionHistory, HealthStatus, HealthSummary, TaskHealth};
pub use journal::{HistoryJournal, JournalWriter};
pub use schedule_file::ScheduleFile;
pub use schedule_store::{merge, ScheduleSnapshot, ScheduleStore, StoreDefaults, StorePaths};
pub use state_file::SchedulerState;

use std::fs;
use std::io::Write;
use std::path::Path;

/// 先写入同目录临时文件再重命名，读取方不会看到写了一半的文件
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(contents)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
}
