//! Builder for JSON response trees.
//!
//! Responses are assembled as a tree of tagged nodes held in an arena. Each
//! node carries a [`Shape`] deciding how its entries serialise:
//!
//! - [`Shape::Object`]: named fields and named child nodes, `{...}`.
//! - [`Shape::ObjectArray`]: one flat object per record, or child nodes,
//!   `[{...}, ...]`.
//! - [`Shape::Matrix`]: rows of bare scalars, `[[...], ...]`.
//! - [`Shape::SimpleArray`]: bare scalars, `[...]`.
//!
//! [`JsonFormatter::push`] descends into a new child and
//! [`JsonFormatter::pop`] returns to its parent, so builders can interleave
//! both freely. Rendering always starts from the root.

use std::fmt;

use crate::value::Value;

const SUCCESS: &str = "success";
const MESSAGE: &str = "message";
const DISCONNECTED: &str = "disconnected";

/// Layout of one node in the response tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Brace-delimited object.
    Object,
    /// Array of flat objects.
    ObjectArray,
    /// Two-dimensional array of scalars.
    Matrix,
    /// Flat array of scalars.
    SimpleArray,
}

#[derive(Debug, Clone)]
enum Entry {
    Field { name: String, value: Value },
    Values(Vec<Value>),
    Record { names: Vec<String>, values: Vec<Value> },
    Child(usize),
}

#[derive(Debug, Clone)]
struct Node {
    shape: Shape,
    name: Option<String>,
    parent: Option<usize>,
    entries: Vec<Entry>,
}

impl Node {
    const fn new(shape: Shape, name: Option<String>, parent: Option<usize>) -> Self {
        Self {
            shape,
            name,
            parent,
            entries: Vec::new(),
        }
    }
}

/// Mutable JSON tree builder.
#[derive(Debug, Clone)]
pub struct JsonFormatter {
    nodes: Vec<Node>,
    current: usize,
}

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    /// Creates a builder whose root is an object.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shape(Shape::Object)
    }

    /// Creates a builder with the given root shape.
    #[must_use]
    pub fn with_shape(shape: Shape) -> Self {
        Self {
            nodes: vec![Node::new(shape, None, None)],
            current: 0,
        }
    }

    /// Builds the standard failure envelope.
    #[must_use]
    pub fn failure(message: impl Into<String>, disconnected: bool) -> Self {
        let mut json = Self::new();
        json.success(false);
        json.add(MESSAGE, message.into());
        if disconnected {
            json.add(DISCONNECTED, true);
        }
        json
    }

    /// Records the outcome as the first field of the root.
    ///
    /// Calling this again replaces the earlier outcome.
    pub fn success(&mut self, success: bool) {
        let root = self.root();
        if let Some(node) = self.nodes.get_mut(root) {
            node.entries
                .retain(|entry| !matches!(entry, Entry::Field { name, .. } if name == SUCCESS));
            node.entries.insert(
                0,
                Entry::Field {
                    name: SUCCESS.to_owned(),
                    value: Value::Bool(success),
                },
            );
        }
    }

    /// Reads the recorded outcome, if any.
    #[must_use]
    pub fn is_success(&self) -> Option<bool> {
        self.nodes.get(self.root()).and_then(|node| {
            node.entries.iter().find_map(|entry| match entry {
                Entry::Field {
                    name,
                    value: Value::Bool(flag),
                } if name == SUCCESS => Some(*flag),
                _ => None,
            })
        })
    }

    /// Opens a named child object and makes it current.
    pub fn push(&mut self, name: &str) {
        self.push_shape(name, Shape::Object);
    }

    /// Opens a named child of the given shape and makes it current.
    pub fn push_shape(&mut self, name: &str, shape: Shape) {
        self.attach(Node::new(shape, Some(name.to_owned()), Some(self.current)));
    }

    /// Returns to the parent of the current node; a no-op at the root.
    pub fn pop(&mut self) {
        if let Some(parent) = self.nodes.get(self.current).and_then(|node| node.parent) {
            self.current = parent;
        }
    }

    /// Appends a named scalar to the current node.
    pub fn add(&mut self, name: &str, value: impl Into<Value>) {
        self.entry(Entry::Field {
            name: name.to_owned(),
            value: value.into(),
        });
    }

    /// Appends scalars: one row of a matrix, or items of a simple array.
    pub fn add_values(&mut self, values: Vec<Value>) {
        self.entry(Entry::Values(values));
    }

    /// Appends one row per element to a matrix.
    pub fn add_rows(&mut self, rows: Vec<Vec<Value>>) {
        for row in rows {
            self.add_values(row);
        }
    }

    /// Appends a record rendered as one flat object of an object array.
    pub fn add_record(&mut self, names: &[String], values: Vec<Value>) {
        self.entry(Entry::Record {
            names: names.to_vec(),
            values,
        });
    }

    /// Adds the failure message field.
    pub fn message(&mut self, message: impl Into<String>) {
        self.add(MESSAGE, message.into());
    }

    /// Grafts another builder's whole tree as an unnamed child of the
    /// current node.
    pub fn graft(&mut self, other: &Self) {
        self.graft_node(other, other.root(), self.current);
    }

    /// Renders the tree, starting from the root, as compact JSON.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root(), &mut out);
        out
    }

    fn root(&self) -> usize {
        let mut index = self.current;
        while let Some(parent) = self.nodes.get(index).and_then(|node| node.parent) {
            index = parent;
        }
        index
    }

    fn attach(&mut self, node: Node) {
        let index = self.nodes.len();
        self.nodes.push(node);
        self.entry(Entry::Child(index));
        self.current = index;
    }

    fn entry(&mut self, entry: Entry) {
        if let Some(node) = self.nodes.get_mut(self.current) {
            node.entries.push(entry);
        }
    }

    fn graft_node(&mut self, other: &Self, source: usize, parent: usize) {
        let Some(node) = other.nodes.get(source) else {
            return;
        };
        let index = self.nodes.len();
        self.nodes
            .push(Node::new(node.shape, node.name.clone(), Some(parent)));
        if let Some(target) = self.nodes.get_mut(parent) {
            target.entries.push(Entry::Child(index));
        }
        for entry in &node.entries {
            match entry {
                Entry::Child(child) => self.graft_node(other, *child, index),
                leaf => {
                    if let Some(target) = self.nodes.get_mut(index) {
                        target.entries.push(leaf.clone());
                    }
                }
            }
        }
    }

    fn render_node(&self, index: usize, out: &mut String) {
        let Some(node) = self.nodes.get(index) else {
            out.push_str("null");
            return;
        };
        match node.shape {
            Shape::Object => self.render_object(node, out),
            Shape::ObjectArray => self.render_object_array(node, out),
            Shape::Matrix => self.render_matrix(node, out),
            Shape::SimpleArray => self.render_simple_array(node, out),
        }
    }

    fn render_object(&self, node: &Node, out: &mut String) {
        out.push('{');
        for (position, entry) in node.entries.iter().enumerate() {
            if position > 0 {
                out.push(',');
            }
            match entry {
                Entry::Field { name, value } => {
                    push_string(out, name);
                    out.push(':');
                    push_value(out, value);
                }
                Entry::Child(child) => {
                    let name = self
                        .nodes
                        .get(*child)
                        .and_then(|node| node.name.as_deref())
                        .unwrap_or_default();
                    push_string(out, name);
                    out.push(':');
                    self.render_node(*child, out);
                }
                Entry::Values(values) => {
                    push_string(out, "");
                    out.push(':');
                    push_array(out, values);
                }
                Entry::Record { names, values } => {
                    push_string(out, "");
                    out.push(':');
                    push_record(out, names, values);
                }
            }
        }
        out.push('}');
    }

    fn render_object_array(&self, node: &Node, out: &mut String) {
        out.push('[');
        for (position, entry) in node.entries.iter().enumerate() {
            if position > 0 {
                out.push(',');
            }
            match entry {
                Entry::Record { names, values } => push_record(out, names, values),
                Entry::Child(child) => self.render_node(*child, out),
                Entry::Field { name, value } => {
                    push_record(out, std::slice::from_ref(name), std::slice::from_ref(value));
                }
                Entry::Values(values) => push_array(out, values),
            }
        }
        out.push(']');
    }

    fn render_matrix(&self, node: &Node, out: &mut String) {
        out.push('[');
        for (position, entry) in node.entries.iter().enumerate() {
            if position > 0 {
                out.push(',');
            }
            match entry {
                Entry::Values(values) | Entry::Record { values, .. } => push_array(out, values),
                Entry::Field { value, .. } => push_array(out, std::slice::from_ref(value)),
                Entry::Child(child) => self.render_node(*child, out),
            }
        }
        out.push(']');
    }

    fn render_simple_array(&self, node: &Node, out: &mut String) {
        out.push('[');
        let mut first = true;
        for entry in &node.entries {
            let values: &[Value] = match entry {
                Entry::Values(values) | Entry::Record { values, .. } => values,
                Entry::Field { value, .. } => std::slice::from_ref(value),
                Entry::Child(child) => {
                    if !first {
                        out.push(',');
                    }
                    first = false;
                    self.render_node(*child, out);
                    continue;
                }
            };
            for value in values {
                if !first {
                    out.push(',');
                }
                first = false;
                push_value(out, value);
            }
        }
        out.push(']');
    }
}

impl fmt::Display for JsonFormatter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn push_record(out: &mut String, names: &[String], values: &[Value]) {
    out.push('{');
    for (position, (name, value)) in names.iter().zip(values).enumerate() {
        if position > 0 {
            out.push(',');
        }
        push_string(out, name);
        out.push(':');
        push_value(out, value);
    }
    out.push('}');
}

fn push_array(out: &mut String, values: &[Value]) {
    out.push('[');
    for (position, value) in values.iter().enumerate() {
        if position > 0 {
            out.push(',');
        }
        push_value(out, value);
    }
    out.push(']');
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Int(int) => out.push_str(&int.to_string()),
        Value::Float(float) if float.is_finite() => out.push_str(&float.to_string()),
        Value::Float(_) => out.push_str("null"),
        Value::Decimal(digits) if is_json_number(digits) => out.push_str(digits),
        Value::Decimal(digits) => push_string(out, digits),
        Value::Text(text) => push_string(out, text),
        date @ Value::Date(_) => push_string(out, &date.to_string()),
    }
}

fn push_string(out: &mut String, text: &str) {
    out.push_str(&serde_json::Value::String(text.to_owned()).to_string());
}

/// Decimal text from adapters is trusted to be numeric only when it parses
/// as a JSON number.
fn is_json_number(text: &str) -> bool {
    !text.is_empty() && serde_json::from_str::<serde_json::Number>(text).is_ok()
}
