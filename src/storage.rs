//! Path-keyed byte storage for results.
//!
//! Storage locations are relative, `/`-separated paths. Compression is a
//! wrapper ([`GzipStorage`]) around any other [`Storage`], independent of where
//! the bytes end up.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A byte sink that must be finished to make its content durable.
pub trait Sink: Write + Send {
    fn finish(self: Box<Self>) -> io::Result<()>;
}

pub trait Storage: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Box<dyn Read + Send>>;

    fn write(&self, path: &str) -> io::Result<Box<dyn Sink>>;

    fn exists(&self, path: &str) -> bool;
}

/// Files below a root directory.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileStorage { root: root.into() }
    }

    /// Resolve `path` below the root. Absolute paths and `..` are rejected.
    fn resolve(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if path.is_empty() || escapes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("storage path `{path}` must be relative and stay below the root"),
            ));
        }
        Ok(self.root.join(relative))
    }
}

struct FileSink(BufWriter<File>);

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Sink for FileSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let file = self.0.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()
    }
}

impl Storage for LocalFileStorage {
    fn read(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(path)?)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn write(&self, path: &str) -> io::Result<Box<dyn Sink>> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&target)?;
        Ok(Box::new(FileSink(BufWriter::new(file))))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

/// Transparent gzip compression over another storage.
pub struct GzipStorage<S> {
    inner: S,
}

impl<S: Storage> GzipStorage<S> {
    pub fn new(inner: S) -> Self {
        GzipStorage { inner }
    }
}

struct GzipSink(GzEncoder<Box<dyn Sink>>);

impl Write for GzipSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl Sink for GzipSink {
    fn finish(self: Box<Self>) -> io::Result<()> {
        self.0.finish()?.finish()
    }
}

impl<S: Storage> Storage for GzipStorage<S> {
    fn read(&self, path: &str) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(GzDecoder::new(self.inner.read(path)?)))
    }

    fn write(&self, path: &str) -> io::Result<Box<dyn Sink>> {
        let sink = self.inner.write(path)?;
        Ok(Box::new(GzipSink(GzEncoder::new(sink, Compression::default()))))
    }

    fn exists(&self, path: &str) -> bool {
        self.inner.exists(path)
    }
}

/// Storage for a single file on disk: its directory as the root, gzip if the
/// name ends in `.gz`. Returns the storage and the file's path within it.
pub fn for_file(file: &Path) -> Result<(Box<dyn Storage>, String)> {
    let name = file
        .file_name()
        .with_context(|| format!("{} is not a file path", file.display()))?
        .to_string_lossy()
        .into_owned();
    let dir = match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let local = LocalFileStorage::new(dir);
    let storage: Box<dyn Storage> = if name.ends_with(".gz") {
        Box::new(GzipStorage::new(local))
    } else {
        Box::new(local)
    };
    Ok((storage, name))
}

pub fn write_json<T: Serialize>(storage: &dyn Storage, path: &str, value: &T) -> Result<()> {
    let mut sink = storage
        .write(path)
        .with_context(|| format!("failed to open `{path}` for writing"))?;
    serde_json::to_writer_pretty(&mut sink, value)
        .with_context(|| format!("failed to serialize `{path}`"))?;
    sink.finish()
        .with_context(|| format!("failed to write `{path}`"))
}

pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, path: &str) -> Result<T> {
    let reader = storage
        .read(path)
        .with_context(|| format!("failed to open `{path}`"))?;
    serde_json::from_reader(reader).with_context(|| format!("failed to parse `{path}`"))
}
