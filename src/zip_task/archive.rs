//! Single-writer incremental zip assembler
//!
//! Exactly one assembler exists per finalize run and all of its methods take
//! `&mut self`, so a second concurrent writer is unrepresentable. The zip
//! writer is synchronous; each operation moves it onto a blocking thread and
//! back.

use log::debug;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::Error;

pub(crate) struct ZipAssembler {
    writer: Option<ZipWriter<std::fs::File>>,
    path: PathBuf,
}

fn entry_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("archive task failed: {}", e))
}

impl ZipAssembler {
    /// Create the archive file and take exclusive ownership of its stream.
    pub(crate) async fn create(path: &Path) -> Result<Self, Error> {
        let archive_path = path.to_path_buf();
        let writer = tokio::task::spawn_blocking(move || -> Result<_, Error> {
            let file = std::fs::File::create(&archive_path)?;
            Ok(ZipWriter::new(file))
        })
        .await
        .map_err(join_error)??;
        Ok(ZipAssembler {
            writer: Some(writer),
            path: path.to_path_buf(),
        })
    }

    /// Stream `src` into a new archive entry named `entry_name`. The file is
    /// copied straight from disk into the writer, never held in memory whole.
    pub(crate) async fn append(&mut self, src: &Path, entry_name: &str) -> Result<u64, Error> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Internal("append on a closed archive".to_string()))?;
        let src = src.to_path_buf();
        let name = entry_name.to_string();

        let (writer, outcome) = tokio::task::spawn_blocking(move || {
            let result = (|| -> Result<u64, Error> {
                writer.start_file(&name, entry_options())?;
                let mut file = std::fs::File::open(&src)?;
                let written = std::io::copy(&mut file, &mut writer)?;
                Ok(written)
            })();
            (writer, result)
        })
        .await
        .map_err(join_error)?;

        self.writer = Some(writer);
        let written = outcome?;
        debug!("archive_append: {} bytes={}", entry_name, written);
        Ok(written)
    }

    /// Close the archive and return its final size on disk.
    pub(crate) async fn finish(&mut self) -> Result<u64, Error> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| Error::Internal("finish on a closed archive".to_string()))?;
        let size = tokio::task::spawn_blocking(move || -> Result<u64, Error> {
            let file = writer.finish()?;
            Ok(file.metadata()?.len())
        })
        .await
        .map_err(join_error)??;
        debug!("archive_finish: {} bytes={}", self.path.display(), size);
        Ok(size)
    }

    /// Close the handle and drop the partial archive (abort path).
    pub(crate) async fn abandon(&mut self) {
        if let Some(writer) = self.writer.take() {
            let _ = tokio::task::spawn_blocking(move || drop(writer)).await;
        }
        let _ = tokio::fs::remove_file(&self.path).await;
        debug!("archive_abandon: {}", self.path.display());
    }
}
