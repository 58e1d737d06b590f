use std::collections::HashMap;
use std::path::Path;

use crate::error::{MetadataError, Result};

/// Maps symbolic debug names emitted by the compiler to absolute addresses in
/// the target process.
pub trait SymbolResolver: Send + Sync {
    fn resolve(&self, symbol: &str) -> Option<u64>;
}

/// Name of the per-method stack address table symbol.
///
/// The code generator emits one such table for every method with debug info;
/// entry `i` holds the current storage address of local variable slot `i`.
pub fn stack_address_symbol(class_name: &str, method_name: &str, descriptor: &str) -> String {
    format!("[J]{class_name}.{method_name}{descriptor}[stackaddr]")
}

#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, u64>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, address: u64) -> Option<u64> {
        self.symbols.insert(symbol.into(), address)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Load a JSON object of `"symbol": address` pairs.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let symbols: HashMap<String, u64> =
            serde_json::from_str(&text).map_err(|err| MetadataError::Parse {
                path: path.to_path_buf(),
                message: err.to_string(),
            })?;
        tracing::debug!(
            target: "rdb.metadata",
            path = %path.display(),
            symbols = symbols.len(),
            "loaded symbol table"
        );
        Ok(Self { symbols })
    }
}

impl FromIterator<(String, u64)> for SymbolTable {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

impl SymbolResolver for SymbolTable {
    fn resolve(&self, symbol: &str) -> Option<u64> {
        self.symbols.get(symbol).copied()
    }
}
