//! Auxiliary buffers owned by operators
//!
//! Buffers translate into kernel declarations, function parameters and the
//! argument expressions used at call sites. The three emission forms
//! (`declare`, `parameter`, `use_expr`) must stay consistent with each other:
//! a parameter declared as a pointer has to be passed an address.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CodegenError, CodegenResult};

/// Initial value of a buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BufferValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<BufferValue>),
}

impl fmt::Display for BufferValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferValue::Bool(b) => write!(f, "{}", b),
            BufferValue::Int(n) => write!(f, "{}", n),
            BufferValue::Float(x) => write!(f, "{:?}", x),
            BufferValue::Text(s) => write!(f, "{}", s),
            BufferValue::List(items) => {
                let inner: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "{{{}}}", inner.join(", "))
            }
        }
    }
}

impl From<i64> for BufferValue {
    fn from(v: i64) -> Self {
        BufferValue::Int(v)
    }
}

impl From<f64> for BufferValue {
    fn from(v: f64) -> Self {
        BufferValue::Float(v)
    }
}

impl From<&str> for BufferValue {
    fn from(v: &str) -> Self {
        BufferValue::Text(v.to_string())
    }
}

/// Device access mode of a global buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BufferAccess {
    /// Each replica has its own buffer in read mode
    Read,
    /// Each replica has its own buffer in write mode
    Write,
    /// Each replica has its own buffer in read-write mode
    Rw,
    /// All replicas share the same buffer in read mode
    #[default]
    ReadAll,
    /// All replicas share the same buffer in write mode
    WriteAll,
    /// All replicas share the same buffer in read-write mode
    RwAll,
}

impl BufferAccess {
    pub fn is_read_only(&self) -> bool {
        matches!(self, BufferAccess::Read | BufferAccess::ReadAll)
    }

    pub fn is_write_only(&self) -> bool {
        matches!(self, BufferAccess::Write | BufferAccess::WriteAll)
    }

    pub fn is_read_write(&self) -> bool {
        matches!(self, BufferAccess::Rw | BufferAccess::RwAll)
    }

    /// One buffer per replica
    pub fn is_single(&self) -> bool {
        matches!(self, BufferAccess::Read | BufferAccess::Write | BufferAccess::Rw)
    }

    /// One buffer shared by every replica
    pub fn is_shared(&self) -> bool {
        !self.is_single()
    }
}

/// Identity shared by every buffer variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferShape {
    pub datatype: String,
    pub name: String,
    /// Extent of each dimension, never empty, every extent at least 1
    pub size: Vec<usize>,
    pub value: Option<BufferValue>,
}

impl BufferShape {
    pub fn new(
        datatype: &str,
        name: &str,
        size: &[usize],
        value: Option<BufferValue>,
    ) -> CodegenResult<Self> {
        if datatype.is_empty() {
            return Err(CodegenError::configuration(format!(
                "buffer '{}' has no datatype",
                name
            )));
        }
        if name.is_empty() {
            return Err(CodegenError::configuration("buffer name cannot be empty"));
        }
        if size.is_empty() {
            return Err(CodegenError::configuration(format!(
                "buffer '{}' needs at least one dimension",
                name
            )));
        }
        if size.iter().any(|&s| s < 1) {
            return Err(CodegenError::configuration(format!(
                "each dimension of buffer '{}' must be at least 1",
                name
            )));
        }
        Ok(Self {
            datatype: datatype.to_string(),
            name: name.to_string(),
            size: size.to_vec(),
            value,
        })
    }

    /// Any dimension larger than one
    pub fn is_array(&self) -> bool {
        self.size.iter().any(|&s| s > 1)
    }

    /// Number of elements across all dimensions
    pub fn total_size(&self) -> usize {
        self.size.iter().product()
    }

    /// `[d0][d1]...` suffix, empty for scalars
    fn dims(&self) -> String {
        if !self.is_array() {
            return String::new();
        }
        self.size.iter().map(|s| format!("[{}]", s)).collect()
    }

    fn initializer(&self) -> String {
        match &self.value {
            Some(v) => format!(" = {}", v),
            None => String::new(),
        }
    }
}

/// Per-replica scratch storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrivateBuffer {
    #[serde(flatten)]
    pub shape: BufferShape,
    /// Pass by reference even when scalar
    pub ptr: bool,
    pub attributes: Option<String>,
}

impl PrivateBuffer {
    pub fn is_ptr_parameter(&self) -> bool {
        self.shape.is_array() || self.ptr
    }

    pub fn declare(&self) -> String {
        let mut d = format!("__private {}", self.shape.datatype);
        if let Some(attr) = &self.attributes {
            d.push(' ');
            d.push_str(attr);
        }
        d.push(' ');
        d.push_str(&self.shape.name);
        d.push_str(&self.shape.dims());
        d.push_str(&self.shape.initializer());
        d
    }

    pub fn parameter(&self) -> String {
        let b = &self.shape;
        if b.is_array() {
            format!("__private {} {}{}", b.datatype, b.name, b.dims())
        } else if self.ptr {
            format!("__private {} * {}", b.datatype, b.name)
        } else {
            format!("__private {} {}", b.datatype, b.name)
        }
    }

    pub fn use_expr(&self) -> String {
        if !self.shape.is_array() && self.ptr {
            format!("&{}", self.shape.name)
        } else {
            self.shape.name.clone()
        }
    }
}

/// Storage shared within a replica's local working group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalBuffer {
    #[serde(flatten)]
    pub shape: BufferShape,
    pub attributes: Option<String>,
}

impl LocalBuffer {
    pub fn is_ptr_parameter(&self) -> bool {
        self.shape.is_array()
    }

    pub fn declare(&self) -> String {
        let mut d = format!("__local {}", self.shape.datatype);
        if let Some(attr) = &self.attributes {
            d.push(' ');
            d.push_str(attr);
        }
        d.push(' ');
        d.push_str(&self.shape.name);
        d.push_str(&self.shape.dims());
        d.push_str(&self.shape.initializer());
        d
    }

    pub fn parameter(&self) -> String {
        let b = &self.shape;
        if b.is_array() {
            format!("__local {} {}{}", b.datatype, b.name, b.dims())
        } else {
            // scalars are passed by address, see use_expr
            format!("__local {} * {}", b.datatype, b.name)
        }
    }

    pub fn use_expr(&self) -> String {
        if self.is_ptr_parameter() {
            self.shape.name.clone()
        } else {
            format!("&{}", self.shape.name)
        }
    }
}

/// Device-resident storage allocated (or set) by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalBuffer {
    #[serde(flatten)]
    pub shape: BufferShape,
    pub access: BufferAccess,
    /// When false the buffer is a compile-time scalar constant
    pub ptr: bool,
}

impl GlobalBuffer {
    /// A scalar constant set at kernel launch, not an allocated buffer
    pub fn has_value(&self) -> bool {
        !self.ptr && self.shape.value.is_some()
    }

    pub fn is_ptr_parameter(&self) -> bool {
        self.ptr || self.shape.is_array()
    }

    pub fn parameter(&self) -> String {
        let b = &self.shape;
        let constness = if self.access.is_read_only() { "const " } else { "" };
        if self.is_ptr_parameter() {
            format!("{}__global {} * restrict {}", constness, b.datatype, b.name)
        } else {
            format!("{}{} {}", constness, b.datatype, b.name)
        }
    }

    pub fn use_expr(&self) -> String {
        self.shape.name.clone()
    }

    /// OpenCL memory flags for the host-side allocation
    pub fn flags(&self) -> &'static str {
        if self.access.is_read_only() {
            "CL_MEM_READ_ONLY"
        } else if self.access.is_write_only() {
            "CL_MEM_WRITE_ONLY"
        } else {
            "CL_MEM_READ_WRITE"
        }
    }

    pub fn queues_name(&self) -> String {
        format!("{}_buffer_queues", self.shape.name)
    }

    pub fn buffers_name(&self) -> String {
        format!("{}_buffers", self.shape.name)
    }

    /// Index into the per-replica vectors; shared buffers always use slot 0
    pub fn replica_slot<'a>(&self, replica: &'a str) -> &'a str {
        if self.access.is_single() {
            replica
        } else {
            "0"
        }
    }

    /// Host-side declaration of a constant-valued buffer
    pub fn declare_and_init(&self) -> Option<String> {
        if !self.has_value() {
            return None;
        }
        self.shape
            .value
            .as_ref()
            .map(|v| format!("{} {} = {}", self.shape.datatype, self.shape.name, v))
    }
}

/// A buffer owned by an operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "lowercase")]
pub enum Buffer {
    Private(PrivateBuffer),
    Local(LocalBuffer),
    Global(GlobalBuffer),
}

impl Buffer {
    pub fn private(
        datatype: &str,
        name: &str,
        size: &[usize],
        value: Option<BufferValue>,
        ptr: bool,
        attributes: Option<&str>,
    ) -> CodegenResult<Self> {
        Ok(Buffer::Private(PrivateBuffer {
            shape: BufferShape::new(datatype, name, size, value)?,
            ptr,
            attributes: attributes.map(str::to_string),
        }))
    }

    pub fn local(
        datatype: &str,
        name: &str,
        size: &[usize],
        value: Option<BufferValue>,
        attributes: Option<&str>,
    ) -> CodegenResult<Self> {
        Ok(Buffer::Local(LocalBuffer {
            shape: BufferShape::new(datatype, name, size, value)?,
            attributes: attributes.map(str::to_string),
        }))
    }

    pub fn global(
        datatype: &str,
        name: &str,
        size: &[usize],
        access: BufferAccess,
        ptr: bool,
        value: Option<BufferValue>,
    ) -> CodegenResult<Self> {
        let shape = BufferShape::new(datatype, name, size, value)?;
        if !ptr && shape.is_array() {
            return Err(CodegenError::configuration(format!(
                "global buffer '{}' has to be of size [1] when ptr is false",
                name
            )));
        }
        if !ptr && shape.value.is_none() {
            return Err(CodegenError::configuration(format!(
                "global buffer '{}' needs a value when ptr is false",
                name
            )));
        }
        Ok(Buffer::Global(GlobalBuffer { shape, access, ptr }))
    }

    pub fn shape(&self) -> &BufferShape {
        match self {
            Buffer::Private(b) => &b.shape,
            Buffer::Local(b) => &b.shape,
            Buffer::Global(b) => &b.shape,
        }
    }

    pub fn name(&self) -> &str {
        &self.shape().name
    }

    pub fn datatype(&self) -> &str {
        &self.shape().datatype
    }

    /// Kernel-scope declaration; global buffers are parameters only
    pub fn declare(&self) -> Option<String> {
        match self {
            Buffer::Private(b) => Some(b.declare()),
            Buffer::Local(b) => Some(b.declare()),
            Buffer::Global(_) => None,
        }
    }

    pub fn parameter(&self) -> String {
        match self {
            Buffer::Private(b) => b.parameter(),
            Buffer::Local(b) => b.parameter(),
            Buffer::Global(b) => b.parameter(),
        }
    }

    pub fn use_expr(&self) -> String {
        match self {
            Buffer::Private(b) => b.use_expr(),
            Buffer::Local(b) => b.use_expr(),
            Buffer::Global(b) => b.use_expr(),
        }
    }
}
