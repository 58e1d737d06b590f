use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;

/// Storage class of a local variable as recorded by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    #[serde(alias = "int")]
    Int32,
    #[serde(alias = "float")]
    Float32,
    #[serde(alias = "long")]
    Int64,
    #[serde(alias = "double")]
    Float64,
    Object,
}

impl TypeTag {
    /// Width in bytes of the decoded value. `Object` references are pointer sized.
    pub const fn natural_size(self) -> u32 {
        match self {
            TypeTag::Int32 | TypeTag::Float32 => 4,
            TypeTag::Int64 | TypeTag::Float64 | TypeTag::Object => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVariableInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: TypeTag,
    #[serde(default)]
    pub memory_offset: i32,
    pub size_bytes: u32,
    pub scope_start_line: u32,
    pub scope_end_line: u32,
    pub slot_index: u32,
}

impl LocalVariableInfo {
    pub fn in_scope(&self, line: u32) -> bool {
        self.scope_start_line <= line && line <= self.scope_end_line
    }
}

#[derive(Deserialize, Serialize)]
struct MethodInfoRepr {
    name: String,
    descriptor: String,
    #[serde(default)]
    local_variables: Vec<LocalVariableInfo>,
}

/// A compiled method and its local variables, ordered by slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MethodInfoRepr", into = "MethodInfoRepr")]
pub struct MethodInfo {
    name: String,
    descriptor: String,
    local_variables: Vec<LocalVariableInfo>,
}

impl MethodInfo {
    /// Build a method descriptor; `local_variables` may be in any order but their
    /// slot indices must form the dense sequence `0..len`.
    pub fn new(
        name: impl Into<String>,
        descriptor: impl Into<String>,
        mut local_variables: Vec<LocalVariableInfo>,
    ) -> Result<Self, MetadataError> {
        let name = name.into();
        let descriptor = descriptor.into();

        local_variables.sort_by_key(|v| v.slot_index);
        let dense = local_variables
            .iter()
            .enumerate()
            .all(|(i, v)| v.slot_index as usize == i);
        if !dense {
            return Err(MetadataError::InvalidSlots {
                name,
                descriptor,
                found: local_variables.iter().map(|v| v.slot_index).collect(),
            });
        }

        Ok(Self {
            name,
            descriptor,
            local_variables,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub fn local_variables(&self) -> &[LocalVariableInfo] {
        &self.local_variables
    }
}

impl TryFrom<MethodInfoRepr> for MethodInfo {
    type Error = MetadataError;

    fn try_from(repr: MethodInfoRepr) -> Result<Self, Self::Error> {
        MethodInfo::new(repr.name, repr.descriptor, repr.local_variables)
    }
}

impl From<MethodInfo> for MethodInfoRepr {
    fn from(method: MethodInfo) -> Self {
        Self {
            name: method.name,
            descriptor: method.descriptor,
            local_variables: method.local_variables,
        }
    }
}

#[derive(Deserialize, Serialize)]
struct ClazzInfoRepr {
    name: String,
    #[serde(default)]
    methods: Vec<MethodInfo>,
}

/// A compiled class: its name and methods keyed by `(name, descriptor)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ClazzInfoRepr", into = "ClazzInfoRepr")]
pub struct ClazzInfo {
    name: String,
    methods: Vec<MethodInfo>,
    index: HashMap<(String, String), usize>,
}

impl ClazzInfo {
    pub fn new(name: impl Into<String>, methods: Vec<MethodInfo>) -> Result<Self, MetadataError> {
        let name = name.into();
        let mut index = HashMap::with_capacity(methods.len());
        for (i, method) in methods.iter().enumerate() {
            let key = (method.name.clone(), method.descriptor.clone());
            if index.insert(key, i).is_some() {
                return Err(MetadataError::DuplicateMethod {
                    class: name,
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                });
            }
        }
        Ok(Self {
            name,
            methods,
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    pub fn method(&self, name: &str, descriptor: &str) -> Option<&MethodInfo> {
        self.index
            .get(&(name.to_owned(), descriptor.to_owned()))
            .map(|&i| &self.methods[i])
    }
}

impl TryFrom<ClazzInfoRepr> for ClazzInfo {
    type Error = MetadataError;

    fn try_from(repr: ClazzInfoRepr) -> Result<Self, Self::Error> {
        ClazzInfo::new(repr.name, repr.methods)
    }
}

impl From<ClazzInfo> for ClazzInfoRepr {
    fn from(class: ClazzInfo) -> Self {
        Self {
            name: class.name,
            methods: class.methods,
        }
    }
}
