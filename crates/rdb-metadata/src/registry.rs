use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{MetadataError, Result};
use crate::types::ClazzInfo;

/// Where compiled class metadata comes from.
pub trait ClassSource: Send + Sync {
    fn load_class(&self, name: &str) -> Result<ClazzInfo>;
}

/// In-memory class source, mainly for tests and embedders that already hold
/// the compiler's output.
#[derive(Debug, Default, Clone)]
pub struct MemoryClassSource {
    classes: HashMap<String, ClazzInfo>,
}

impl MemoryClassSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: ClazzInfo) -> &mut Self {
        self.classes.insert(class.name().to_owned(), class);
        self
    }

    pub fn with_class(mut self, class: ClazzInfo) -> Self {
        self.insert(class);
        self
    }
}

impl ClassSource for MemoryClassSource {
    fn load_class(&self, name: &str) -> Result<ClazzInfo> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| MetadataError::ClassNotFound(name.to_owned()))
    }
}

/// Reads `<root>/<class/name>.json`, the debug-info layout emitted next to the
/// compiled objects. Dots in the class name map to directory separators.
#[derive(Debug, Clone)]
pub struct DirectoryClassSource {
    root: PathBuf,
}

impl DirectoryClassSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, class_name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in class_name.split('.') {
            path.push(segment);
        }
        path.set_extension("json");
        path
    }
}

impl ClassSource for DirectoryClassSource {
    fn load_class(&self, name: &str) -> Result<ClazzInfo> {
        let path = self.path_for(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetadataError::ClassNotFound(name.to_owned()))
            }
            Err(source) => return Err(MetadataError::Io { path, source }),
        };

        let class: ClazzInfo =
            serde_json::from_str(&text).map_err(|err| MetadataError::Parse {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if class.name() != name {
            return Err(MetadataError::Parse {
                path,
                message: format!("file describes class `{}`, expected `{name}`", class.name()),
            });
        }
        Ok(class)
    }
}

/// Lazily populated, shared cache of compiled classes.
///
/// Lookups take a read lock; a miss loads from the source without holding any
/// lock and then inserts. If two callers race on the same class, the first
/// insert wins and both observe the same `Arc`.
pub struct ClassRegistry {
    source: Box<dyn ClassSource>,
    classes: RwLock<HashMap<String, Arc<ClazzInfo>>>,
}

impl ClassRegistry {
    pub fn new(source: impl ClassSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            classes: RwLock::new(HashMap::new()),
        }
    }

    pub fn load_class(&self, name: &str) -> Result<Arc<ClazzInfo>> {
        if let Some(class) = self.classes.read().get(name) {
            return Ok(class.clone());
        }

        let loaded = self.source.load_class(name)?;
        tracing::debug!(
            target: "rdb.metadata",
            class = name,
            methods = loaded.methods().len(),
            "loaded class metadata"
        );

        let mut classes = self.classes.write();
        Ok(classes
            .entry(name.to_owned())
            .or_insert_with(|| Arc::new(loaded))
            .clone())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.classes.read().contains_key(name)
    }

    pub fn loaded_count(&self) -> usize {
        self.classes.read().len()
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("loaded", &self.loaded_count())
            .finish_non_exhaustive()
    }
}
