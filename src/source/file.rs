use crate::core::{PlayerError, Result};
use crate::source::ByteSource;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// 本地文件字节源
///
/// File 句柄用 Mutex 保护，read_range 内部 seek + read_exact，
/// 保证交错读取互不影响。
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
    path: String,
    aborted: AtomicBool,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| PlayerError::OpenError(format!("无法打开文件 {}: {}", path.display(), e)))?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
            path: path.display().to_string(),
            aborted: AtomicBool::new(false),
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_range(&self, start: u64, end: u64) -> Result<Vec<u8>> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(PlayerError::Aborted);
        }
        if start > end || end > self.len {
            return Err(PlayerError::FormatError(format!(
                "读取区间越界: [{}, {}) / {}",
                start, end, self.len
            )));
        }
        let mut buf = vec![0u8; (end - start) as usize];
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn description(&self) -> String {
        format!("FileSource: {} ({} bytes)", self.path, self.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_ranges_from_file() {
        let mut tmp = std::env::temp_dir();
        tmp.push("myy_file_source_test.bin");
        {
            let mut f = File::create(&tmp).unwrap();
            f.write_all(b"0123456789").unwrap();
        }

        let source = FileSource::open(&tmp).unwrap();
        assert_eq!(source.len(), 10);
        assert_eq!(source.read_range(3, 7).unwrap(), b"3456");
        assert_eq!(source.read_range(0, 3).unwrap(), b"012");
        assert_eq!(source.read_range(3, 7).unwrap(), b"3456");

        let _ = std::fs::remove_file(&tmp);
    }
}
