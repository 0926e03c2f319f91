//! In-memory object store
//!
//! Data lives in a namespace shared by every store obtained through
//! [`MemoryStore::share`], so the threads of one process grid read and write
//! the same dataset. Handles and selections stay private to each instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    check_transfer, AccessMode, ContainerId, Dataspace, HandleTable, ObjectId, ObjectStore, SpaceTracker,
    StoreError,
};
use crate::constants::ELEMENT_SIZE;

#[derive(Debug)]
struct MemObject {
    shape: Vec<u64>,
    data: Vec<f64>,
}

type Namespace = HashMap<String, HashMap<String, MemObject>>;

#[derive(Debug)]
struct OpenContainer {
    path: String,
    mode: AccessMode,
}

#[derive(Debug)]
struct OpenObject {
    container: String,
    path: String,
    shape: Vec<u64>,
    mode: AccessMode,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    shared: Arc<Mutex<Namespace>>,
    containers: HandleTable<OpenContainer>,
    objects: HandleTable<OpenObject>,
    spaces: SpaceTracker,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new instance over the same data, with its own handle tables
    pub fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            ..Self::default()
        }
    }

    /// Drop a container and everything in it
    pub fn reset(&self, path: &str) {
        self.lock().remove(path);
    }

    /// Object paths in a container, sorted
    pub fn object_paths(&self, container: &str) -> Vec<String> {
        let ns = self.lock();
        let mut paths: Vec<String> = ns
            .get(container)
            .map(|objs| objs.keys().cloned().collect())
            .unwrap_or_default();
        paths.sort();
        paths
    }

    /// Copy of one object's data
    pub fn object_data(&self, container: &str, path: &str) -> Option<Vec<f64>> {
        self.lock().get(container)?.get(path).map(|o| o.data.clone())
    }

    /// Selections handed out and not yet released by this instance
    pub fn outstanding_spaces(&self) -> usize {
        self.spaces.outstanding()
    }

    /// Objects currently open through this instance
    pub fn open_objects(&self) -> usize {
        self.objects.len()
    }

    fn lock(&self) -> MutexGuard<'_, Namespace> {
        // a panicked peer thread leaves plain data behind, nothing to repair
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ObjectStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_container(&mut self, path: &str) -> Result<ContainerId, StoreError> {
        self.lock().entry(path.to_string()).or_default();
        let id = self.containers.insert(OpenContainer {
            path: path.to_string(),
            mode: AccessMode::ReadWrite,
        });
        Ok(ContainerId(id))
    }

    fn open_container(&mut self, path: &str, mode: AccessMode) -> Result<ContainerId, StoreError> {
        if !self.lock().contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let id = self.containers.insert(OpenContainer { path: path.to_string(), mode });
        Ok(ContainerId(id))
    }

    fn close_container(&mut self, container: ContainerId) -> Result<(), StoreError> {
        self.containers.remove(container.0).map(|_| ())
    }

    fn container_size(&self, container: ContainerId) -> Result<u64, StoreError> {
        let open = self.containers.get(container.0)?;
        let ns = self.lock();
        let objs = ns.get(&open.path).ok_or_else(|| StoreError::NotFound(open.path.clone()))?;
        Ok(objs.values().map(|o| o.data.len() as u64 * ELEMENT_SIZE).sum())
    }

    fn create_object(&mut self, container: ContainerId, path: &str, shape: &[u64]) -> Result<ObjectId, StoreError> {
        let open = self.containers.get(container.0)?;
        if open.mode == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly(open.path.clone()));
        }
        let container_path = open.path.clone();
        {
            let mut ns = self.lock();
            let objs = ns
                .get_mut(&container_path)
                .ok_or_else(|| StoreError::NotFound(container_path.clone()))?;
            match objs.get(path) {
                Some(existing) if existing.shape != shape => {
                    return Err(StoreError::ShapeMismatch {
                        path: path.to_string(),
                        expected: shape.to_vec(),
                        found: existing.shape.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    let len = shape.iter().product::<u64>() as usize;
                    objs.insert(path.to_string(), MemObject { shape: shape.to_vec(), data: vec![0.0; len] });
                }
            }
        }
        let id = self.objects.insert(OpenObject {
            container: container_path,
            path: path.to_string(),
            shape: shape.to_vec(),
            mode: AccessMode::ReadWrite,
        });
        Ok(ObjectId(id))
    }

    fn open_object(&mut self, container: ContainerId, path: &str, mode: AccessMode) -> Result<ObjectId, StoreError> {
        let open = self.containers.get(container.0)?;
        let mode = if open.mode == AccessMode::ReadOnly { AccessMode::ReadOnly } else { mode };
        let container_path = open.path.clone();
        let shape = {
            let ns = self.lock();
            ns.get(&container_path)
                .and_then(|objs| objs.get(path))
                .map(|o| o.shape.clone())
                .ok_or_else(|| StoreError::NotFound(path.to_string()))?
        };
        let id = self.objects.insert(OpenObject {
            container: container_path,
            path: path.to_string(),
            shape,
            mode,
        });
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
        let open = self.objects.get(object.0)?;
        if open.mode == AccessMode::ReadOnly {
            return Err(StoreError::ReadOnly(open.path.clone()));
        }
        check_transfer(&open.path, &open.shape, space, buf.len())?;

        let mut ns = self.lock();
        let obj = ns
            .get_mut(&open.container)
            .and_then(|objs| objs.get_mut(&open.path))
            .ok_or_else(|| StoreError::NotFound(open.path.clone()))?;
        let mut cursor = 0usize;
        for (offset, len) in space.runs() {
            let (offset, len) = (offset as usize, len as usize);
            obj.data[offset..offset + len].copy_from_slice(&buf[cursor..cursor + len]);
            cursor += len;
        }
        Ok(())
    }

    fn read(&mut self, object: ObjectId, space: &Dataspace, buf: &mut [f64]) -> Result<(), StoreError> {
        let open = self.objects.get(object.0)?;
        check_transfer(&open.path, &open.shape, space, buf.len())?;

        let ns = self.lock();
        let obj = ns
            .get(&open.container)
            .and_then(|objs| objs.get(&open.path))
            .ok_or_else(|| StoreError::NotFound(open.path.clone()))?;
        let mut cursor = 0usize;
        for (offset, len) in space.runs() {
            let (offset, len) = (offset as usize, len as usize);
            buf[cursor..cursor + len].copy_from_slice(&obj.data[offset..offset + len]);
            cursor += len;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_read_hyperslab() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        let o = store.create_object(c, "step=0", &[2, 4]).unwrap();

        let mut space = store.address_space(o).unwrap();
        space.select_hyperslab(&[1, 1], &[1, 2]).unwrap();
        store.write(o, &space, &[7.0, 8.0]).unwrap();
        store.release_space(space).unwrap();
        store.close_object(o).unwrap();

        assert_eq!(
            store.object_data("ds", "step=0").unwrap(),
            vec![0.0, 0.0, 0.0, 0.0, 0.0, 7.0, 8.0, 0.0]
        );
        assert_eq!(store.container_size(c).unwrap(), 8 * 8);
    }

    #[test]
    fn test_shared_instances_see_same_data() {
        let mut a = MemoryStore::new();
        let mut b = a.share();
        let ca = a.create_container("ds").unwrap();
        let oa = a.create_object(ca, "array=0", &[3]).unwrap();
        let sa = a.address_space(oa).unwrap();
        a.write(oa, &sa, &[1.0, 2.0, 3.0]).unwrap();
        a.release_space(sa).unwrap();

        // collective create on the peer reuses the existing object
        let cb = b.create_container("ds").unwrap();
        let ob = b.create_object(cb, "array=0", &[3]).unwrap();
        let sb = b.address_space(ob).unwrap();
        let mut buf = vec![0.0; 3];
        b.read(ob, &sb, &mut buf).unwrap();
        b.release_space(sb).unwrap();
        assert_eq!(buf, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_open_missing_object() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        assert!(matches!(store.open_object(c, "array=9", AccessMode::ReadOnly), Err(StoreError::NotFound(_))));
        assert!(matches!(store.open_container("nope", AccessMode::ReadOnly), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_read_only_rejects_write_and_create() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        store.create_object(c, "dataset", &[2]).unwrap();

        let ro = store.open_container("ds", AccessMode::ReadOnly).unwrap();
        assert!(matches!(store.create_object(ro, "other", &[2]), Err(StoreError::ReadOnly(_))));
        let o = store.open_object(ro, "dataset", AccessMode::ReadWrite).unwrap();
        let space = store.address_space(o).unwrap();
        assert!(matches!(store.write(o, &space, &[1.0, 2.0]), Err(StoreError::ReadOnly(_))));
        store.release_space(space).unwrap();
        assert_eq!(store.outstanding_spaces(), 0);
    }

    #[test]
    fn test_create_with_other_shape_fails() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        store.create_object(c, "dataset", &[2, 2]).unwrap();
        assert!(matches!(store.create_object(c, "dataset", &[4]), Err(StoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_buffer_size_checked() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        let o = store.create_object(c, "dataset", &[4]).unwrap();
        let space = store.address_space(o).unwrap();
        assert!(matches!(
            store.write(o, &space, &[1.0]),
            Err(StoreError::BufferSize { expected: 4, found: 1 })
        ));
        store.release_space(space).unwrap();
    }

    #[test]
    fn test_double_close_is_misuse() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        let o = store.create_object(c, "dataset", &[1]).unwrap();
        store.close_object(o).unwrap();
        assert!(matches!(store.close_object(o), Err(StoreError::InvalidHandle(_))));
    }

    #[test]
    fn test_reset_drops_container() {
        let mut store = MemoryStore::new();
        let c = store.create_container("ds").unwrap();
        store.create_object(c, "dataset", &[1]).unwrap();
        store.reset("ds");
        assert!(store.object_paths("ds").is_empty());
    }
}
