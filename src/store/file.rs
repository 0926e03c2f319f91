//! File-backed object store
//!
//! A container is a directory. Each object is one file named
//! `<container>/<object path>.gds`, so the layout `step=3/array=7` becomes the
//! file `step=3/array=7.gds` inside the `step=3` directory.
//!
//! File format: 48-byte header (magic, ndims, four dims; little-endian u64)
//! followed by the row-major little-endian f64 payload.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use super::{
    check_transfer, AccessMode, ContainerId, Dataspace, HandleTable, ObjectId, ObjectStore, SpaceTracker,
    StoreError,
};
use crate::constants::{
    ELEMENT_SIZE, MAX_OBJECT_DIMS, OBJECT_FILE_EXTENSION, OBJECT_FILE_MAGIC, OBJECT_HEADER_LEN,
};

#[derive(Debug)]
struct OpenContainer {
    root: PathBuf,
    mode: AccessMode,
}

#[derive(Debug)]
struct OpenFile {
    path: PathBuf,
    file: File,
    shape: Vec<u64>,
    mode: AccessMode,
}

#[derive(Debug, Default)]
pub struct FileStore {
    containers: HandleTable<OpenContainer>,
    objects: HandleTable<OpenFile>,
    spaces: SpaceTracker,
    scratch: Vec<u8>,
}

impl FileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a stale container directory, if any
    pub fn reset(path: &Path) -> Result<(), StoreError> {
        if path.exists() {
            debug!("Removing stale container {}", path.display());
            fs::remove_dir_all(path).map_err(|e| StoreError::io(path, e))?;
        }
        Ok(())
    }

    /// On-disk file of an object inside a container
    pub fn object_file(root: &Path, object_path: &str) -> PathBuf {
        root.join(format!("{}.{}", object_path, OBJECT_FILE_EXTENSION))
    }

    /// Selections handed out and not yet released
    pub fn outstanding_spaces(&self) -> usize {
        self.spaces.outstanding()
    }

    fn container_root(&self, container: ContainerId) -> Result<&OpenContainer, StoreError> {
        self.containers.get(container.0)
    }
}

fn encode_header(shape: &[u64]) -> Vec<u8> {
    let mut header = Vec::with_capacity(OBJECT_HEADER_LEN as usize);
    header.extend_from_slice(OBJECT_FILE_MAGIC);
    header.extend_from_slice(&(shape.len() as u64).to_le_bytes());
    for dim in 0..MAX_OBJECT_DIMS {
        let extent = shape.get(dim).copied().unwrap_or(0);
        header.extend_from_slice(&extent.to_le_bytes());
    }
    header
}

fn decode_header(path: &Path, header: &[u8]) -> Result<Vec<u64>, StoreError> {
    let corrupt = |reason: &str| StoreError::CorruptHeader {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };
    if header.len() < OBJECT_HEADER_LEN as usize {
        return Err(corrupt("short header"));
    }
    if &header[..8] != OBJECT_FILE_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let word = |i: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&header[8 + i * 8..16 + i * 8]);
        u64::from_le_bytes(bytes)
    };
    let ndims = word(0) as usize;
    if ndims == 0 || ndims > MAX_OBJECT_DIMS {
        return Err(corrupt("bad dimension count"));
    }
    Ok((0..ndims).map(|d| word(1 + d)).collect())
}

fn read_header(path: &Path, file: &mut File) -> Result<Vec<u64>, StoreError> {
    let mut header = vec![0u8; OBJECT_HEADER_LEN as usize];
    file.seek(SeekFrom::Start(0)).map_err(|e| StoreError::io(path, e))?;
    file.read_exact(&mut header).map_err(|e| StoreError::io(path, e))?;
    decode_header(path, &header)
}

impl ObjectStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn create_container(&mut self, path: &str) -> Result<ContainerId, StoreError> {
        let root = PathBuf::from(path);
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        let id = self.containers.insert(OpenContainer { root, mode: AccessMode::ReadWrite });
        Ok(ContainerId(id))
    }

    fn open_container(&mut self, path: &str, mode: AccessMode) -> Result<ContainerId, StoreError> {
        let root = PathBuf::from(path);
        if !root.is_dir() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let id = self.containers.insert(OpenContainer { root, mode });
        Ok(ContainerId(id))
    }

    fn close_container(&mut self, container: ContainerId) -> Result<(), StoreError> {
        self.containers.remove(container.0).map(|_| ())
    }

    fn container_size(&self, container: ContainerId) -> Result<u64, StoreError> {
        let open = self.container_root(container)?;
        let mut total = 0u64;
        for entry in WalkDir::new(&open.root) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| open.root.clone());
                StoreError::io(path, e.into())
            })?;
            if entry.file_type().is_file() {
                let meta = entry.metadata().map_err(|e| StoreError::io(entry.path(), e.into()))?;
                total += meta.len();
            }
        }
        Ok(total)
    }

    fn create_object(&mut self, container: ContainerId, path: &str, shape: &[u64]) -> Result<ObjectId, StoreError> {
        let open = self.container_root(container)?;
        if open.mode == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly(open.root.display().to_string()));
        }
        if shape.is_empty() || shape.len() > MAX_OBJECT_DIMS {
            return Err(StoreError::CorruptHeader {
                path: path.to_string(),
                reason: format!("cannot store {} dimensions", shape.len()),
            });
        }
        let file_path = Self::object_file(&open.root, path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        // no truncation: peers of the grid create the same object concurrently
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&file_path)
            .map_err(|e| StoreError::io(&file_path, e))?;
        let len = file.metadata().map_err(|e| StoreError::io(&file_path, e))?.len();
        let payload = shape.iter().product::<u64>() * ELEMENT_SIZE;

        if len >= OBJECT_HEADER_LEN {
            let existing = read_header(&file_path, &mut file)?;
            if existing != shape {
                return Err(StoreError::ShapeMismatch {
                    path: path.to_string(),
                    expected: shape.to_vec(),
                    found: existing,
                });
            }
        } else {
            file.seek(SeekFrom::Start(0)).map_err(|e| StoreError::io(&file_path, e))?;
            file.write_all(&encode_header(shape)).map_err(|e| StoreError::io(&file_path, e))?;
        }
        if len < OBJECT_HEADER_LEN + payload {
            file.set_len(OBJECT_HEADER_LEN + payload).map_err(|e| StoreError::io(&file_path, e))?;
        }

        let id = self.objects.insert(OpenFile {
            path: file_path,
            file,
            shape: shape.to_vec(),
            mode: AccessMode::ReadWrite,
        });
        Ok(ObjectId(id))
    }

    fn open_object(&mut self, container: ContainerId, path: &str, mode: AccessMode) -> Result<ObjectId, StoreError> {
        let open = self.container_root(container)?;
        let mode = if open.mode == AccessMode::ReadOnly { AccessMode::ReadOnly } else { mode };
        let file_path = Self::object_file(&open.root, path);
        if !file_path.is_file() {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(mode == AccessMode::ReadWrite)
            .open(&file_path)
            .map_err(|e| StoreError::io(&file_path, e))?;
        let shape = read_header(&file_path, &mut file)?;
        let id = self.objects.insert(OpenFile { path: file_path, file, shape, mode });
        Ok(ObjectId(id))
    }

    fn close_object(&mut self, object: ObjectId) -> Result<(), StoreError> {
        self.objects.remove(object.0).map(|_| ())
    }

    fn address_space(&mut self, object: ObjectId) -> Result<Dataspace, StoreError> {
        let open = self.objects.get(object.0)?;
        Ok(self.spaces.issue(&open.shape))
    }

    fn release_space(&mut self, space: Dataspace) -> Result<(), StoreError> {
        self.spaces.release(space)
    }

    fn write(&mut self, object: ObjectId, space: &Dataspace, buf: &[f64]) -> Result<(), StoreError> {
        let open = self.objects.get_mut(object.0)?;
        let display = open.path.display().to_string();
        if open.mode == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly(display));
        }
        check_transfer(&display, &open.shape, space, buf.len())?;

        let mut cursor = 0usize;
        for (offset, len) in space.runs() {
            let len = len as usize;
            self.scratch.clear();
            for value in &buf[cursor..cursor + len] {
                self.scratch.extend_from_slice(&value.to_le_bytes());
            }
            open.file
                .seek(SeekFrom::Start(OBJECT_HEADER_LEN + offset * ELEMENT_SIZE))
                .map_err(|e| StoreError::io(&open.path, e))?;
            open.file.write_all(&self.scratch).map_err(|e| StoreError::io(&open.path, e))?;
            cursor += len;
        }
        Ok(())
    }

    fn read(&mut self, object: ObjectId, space: &Dataspace, buf: &mut [f64]) -> Result<(), StoreError> {
        let open = self.objects.get_mut(object.0)?;
        let display = open.path.display().to_string();
        check_transfer(&display, &open.shape, space, buf.len())?;

        let mut cursor = 0usize;
        for (offset, len) in space.runs() {
            let len = len as usize;
            self.scratch.resize(len * ELEMENT_SIZE as usize, 0);
            open.file
                .seek(SeekFrom::Start(OBJECT_HEADER_LEN + offset * ELEMENT_SIZE))
                .map_err(|e| StoreError::io(&open.path, e))?;
            open.file.read_exact(&mut self.scratch).map_err(|e| StoreError::io(&open.path, e))?;
            for (value, chunk) in buf[cursor..cursor + len].iter_mut().zip(self.scratch.chunks_exact(8)) {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(chunk);
                *value = f64::from_le_bytes(bytes);
            }
            cursor += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn container_path(dir: &TempDir) -> String {
        dir.path().join("iotest").display().to_string()
    }

    #[test]
    fn test_header_roundtrip() {
        let header = encode_header(&[3, 4, 5]);
        assert_eq!(header.len() as u64, OBJECT_HEADER_LEN);
        assert_eq!(decode_header(Path::new("x"), &header).unwrap(), vec![3, 4, 5]);
    }

    #[test]
    fn test_bad_magic() {
        let mut header = encode_header(&[2]);
        header[0] = b'X';
        assert!(matches!(decode_header(Path::new("x"), &header), Err(StoreError::CorruptHeader { .. })));
    }

    #[test]
    fn test_nested_object_path_and_size() {
        let dir = TempDir::new().unwrap();
        let root = container_path(&dir);
        let mut store = FileStore::new();
        let c = store.create_container(&root).unwrap();
        let o = store.create_object(c, "step=0/array=1", &[2, 3]).unwrap();
        store.close_object(o).unwrap();

        let file = FileStore::object_file(Path::new(&root), "step=0/array=1");
        assert!(file.is_file());
        assert!(file.parent().unwrap().ends_with("step=0"));
        assert_eq!(store.container_size(c).unwrap(), OBJECT_HEADER_LEN + 6 * 8);
    }

    #[test]
    fn test_write_then_read_across_instances() {
        let dir = TempDir::new().unwrap();
        let root = container_path(&dir);

        let mut writer = FileStore::new();
        let c = writer.create_container(&root).unwrap();
        let o = writer.create_object(c, "dataset", &[2, 2, 3]).unwrap();
        let mut space = writer.address_space(o).unwrap();
        space.select_hyperslab(&[1, 0, 1], &[1, 2, 2]).unwrap();
        writer.write(o, &space, &[1.5, 2.5, 3.5, 4.5]).unwrap();
        writer.release_space(space).unwrap();
        writer.close_object(o).unwrap();
        writer.close_container(c).unwrap();

        let mut reader = FileStore::new();
        let c = reader.open_container(&root, AccessMode::ReadOnly).unwrap();
        let o = reader.open_object(c, "dataset", AccessMode::ReadOnly).unwrap();
        let space = reader.address_space(o).unwrap();
        let mut all = vec![-1.0; 12];
        reader.read(o, &space, &mut all).unwrap();
        reader.release_space(space).unwrap();
        assert_eq!(all, vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.5, 2.5, 0.0, 3.5, 4.5]);
        assert_eq!(reader.outstanding_spaces(), 0);
    }

    #[test]
    fn test_collective_create_keeps_peer_data() {
        let dir = TempDir::new().unwrap();
        let root = container_path(&dir);

        let mut a = FileStore::new();
        let ca = a.create_container(&root).unwrap();
        let oa = a.create_object(ca, "array=0", &[4]).unwrap();
        let sa = a.address_space(oa).unwrap();
        a.write(oa, &sa, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        a.release_space(sa).unwrap();
        a.close_object(oa).unwrap();

        let mut b = FileStore::new();
        let cb = b.create_container(&root).unwrap();
        let ob = b.create_object(cb, "array=0", &[4]).unwrap();
        let sb = b.address_space(ob).unwrap();
        let mut buf = vec![0.0; 4];
        b.read(ob, &sb, &mut buf).unwrap();
        b.release_space(sb).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0, 4.0]);

        assert!(matches!(b.create_object(cb, "array=0", &[5]), Err(StoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let root = container_path(&dir);
        let mut store = FileStore::new();
        assert!(matches!(store.open_container(&root, AccessMode::ReadOnly), Err(StoreError::NotFound(_))));
        let c = store.create_container(&root).unwrap();
        assert!(matches!(store.open_object(c, "array=3", AccessMode::ReadOnly), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_reset_removes_container() {
        let dir = TempDir::new().unwrap();
        let root = container_path(&dir);
        let mut store = FileStore::new();
        let c = store.create_container(&root).unwrap();
        store.create_object(c, "dataset", &[1]).unwrap();
        FileStore::reset(Path::new(&root)).unwrap();
        assert!(!Path::new(&root).exists());
        // resetting a missing container is fine
        FileStore::reset(Path::new(&root)).unwrap();
    }
}
