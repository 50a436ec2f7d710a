use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use taskd_core::{ExecutionRecord, SchedulerResult};
use tracing::warn;

use crate::write_atomic;

/// 执行历史日志，每行一条 JSON 格式的执行记录
pub struct HistoryJournal {
    path: PathBuf,
    state: Mutex<JournalState>,
}

#[derive(Default)]
struct JournalState {
    file: Option<File>,
    /// 日志文件当前的行数
    lines: usize,
}

impl HistoryJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(JournalState::default()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录，无法解析的行会被跳过
    pub fn read_all(&self) -> SchedulerResult<Vec<ExecutionRecord>> {
        let mut writer = self.lock();
        if !self.path.exists() {
            writer.state.lines = 0;
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut records = Vec::new();
        let mut lines = 0;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            lines += 1;
            match serde_json::from_str::<ExecutionRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "跳过无法解析的执行记录 {}:{}: {}",
                    self.path.display(),
                    index + 1,
                    e
                ),
            }
        }
        writer.state.lines = lines;
        Ok(records)
    }

    /// 锁定日志，持有期间其他写入方等待
    pub fn lock(&self) -> JournalWriter<'_> {
        JournalWriter {
            path: &self.path,
            state: self.state.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn append(&self, record: &ExecutionRecord) -> SchedulerResult<()> {
        self.lock().append(record)
    }

    /// 用给定记录重写日志
    pub fn rewrite(&self, records: &[ExecutionRecord]) -> SchedulerResult<()> {
        self.lock().rewrite(records)
    }

    /// 日志文件的行数，包括无法解析的行
    pub fn len(&self) -> usize {
        self.lock().lines()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 持有日志锁的写入句柄
pub struct JournalWriter<'a> {
    path: &'a Path,
    state: MutexGuard<'a, JournalState>,
}

impl JournalWriter<'_> {
    pub fn lines(&self) -> usize {
        self.state.lines
    }

    pub fn append(&mut self, record: &ExecutionRecord) -> SchedulerResult<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        if self.state.file.is_none() {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path)?;
            self.state.file = Some(file);
        }

        if let Some(file) = self.state.file.as_mut() {
            file.write_all(line.as_bytes())?;
            file.flush()?;
            self.state.lines += 1;
        }
        Ok(())
    }

    pub fn rewrite(&mut self, records: &[ExecutionRecord]) -> SchedulerResult<()> {
        let mut content = Vec::new();
        for record in records {
            serde_json::to_writer(&mut content, record)?;
            content.push(b'\n');
        }

        write_atomic(self.path, &content)?;
        // 重命名后旧的文件句柄指向已删除的文件
        self.state.file = None;
        self.state.lines = records.len();
        Ok(())
    }
}
