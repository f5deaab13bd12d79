//! DataBuffer and InputBuffer - core graph node types.
//!
//! A `DataBuffer` is a cheap handle to an immutable node: cloning it shares
//! the node and its whole ancestry, so densely connected graphs stay linear
//! in size no matter how often a feature map is reused.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use super::operation::Operation;

/// Global counter for unique buffer IDs.
static BUFFER_ID_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Unique identifier for a DataBuffer.
pub type BufferId = usize;

/// Static shape of a feature map, reported channels-last as (H, W, C).
///
/// The batch dimension is never part of the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl Shape {
    pub const fn new(height: usize, width: usize, channels: usize) -> Self {
        Self {
            height,
            width,
            channels,
        }
    }

    /// Returns the same spatial size with a different channel count.
    pub fn with_channels(self, channels: usize) -> Self {
        Self { channels, ..self }
    }

    /// Returns `(height, width, channels)`.
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    /// Returns true if both shapes share height and width.
    pub fn same_spatial(&self, other: &Shape) -> bool {
        self.height == other.height && self.width == other.width
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.height, self.width, self.channels)
    }
}

#[derive(Debug, Clone)]
struct BufferNode {
    id: BufferId,
    shape: Shape,
    name: Option<String>,
    producer: Option<Operation>,
    inputs: Vec<DataBuffer>,
}

/// DataBuffer represents a node in the computation graph.
///
/// It tracks:
/// - The shape of the feature map it holds
/// - The operation that produced it (if any)
/// - The input buffers used by that operation
#[derive(Clone, Debug)]
pub struct DataBuffer {
    node: Arc<BufferNode>,
}

impl DataBuffer {
    pub(crate) fn new(shape: Shape, producer: Option<Operation>, inputs: Vec<DataBuffer>) -> Self {
        Self {
            node: Arc::new(BufferNode {
                id: BUFFER_ID_COUNTER.fetch_add(1, Ordering::SeqCst),
                shape,
                name: None,
                producer,
                inputs,
            }),
        }
    }

    /// Attaches a name to this buffer, keeping its ID.
    ///
    /// Names are how stages are looked up after the graph is built.
    pub fn named(self, name: impl Into<String>) -> Self {
        let mut node = Arc::unwrap_or_clone(self.node);
        node.name = Some(name.into());
        Self {
            node: Arc::new(node),
        }
    }

    /// Returns the unique ID of this buffer.
    pub fn id(&self) -> BufferId {
        self.node.id
    }

    /// Returns the shape of this buffer.
    pub fn shape(&self) -> Shape {
        self.node.shape
    }

    /// Returns the name of this buffer, if set.
    pub fn name(&self) -> Option<&str> {
        self.node.name.as_deref()
    }

    /// Returns true if this is an input buffer (no producer).
    pub fn is_input(&self) -> bool {
        self.node.producer.is_none()
    }

    /// Returns the producer operation, if any.
    pub fn producer(&self) -> Option<&Operation> {
        self.node.producer.as_ref()
    }

    /// Returns the input buffers.
    pub fn inputs(&self) -> &[DataBuffer] {
        &self.node.inputs
    }
}

/// InputBuffer represents an input to the computation graph.
#[derive(Clone, Debug)]
pub struct InputBuffer {
    buffer: DataBuffer,
}

impl InputBuffer {
    /// Creates a new InputBuffer with the given shape.
    pub fn new(shape: Shape) -> Self {
        Self {
            buffer: DataBuffer::new(shape, None, vec![]),
        }
    }

    /// Creates a new named InputBuffer.
    pub fn named(shape: Shape, name: impl Into<String>) -> Self {
        Self {
            buffer: DataBuffer::new(shape, None, vec![]).named(name),
        }
    }

    /// Returns the DataBuffer for use in graph building.
    pub fn buffer(&self) -> DataBuffer {
        self.buffer.clone()
    }

    /// Returns the shape of this input.
    pub fn shape(&self) -> Shape {
        self.buffer.shape()
    }

    /// Returns the buffer ID.
    pub fn id(&self) -> BufferId {
        self.buffer.id()
    }

    /// Returns the name of this input, if set.
    pub fn name(&self) -> Option<&str> {
        self.buffer.name()
    }
}
