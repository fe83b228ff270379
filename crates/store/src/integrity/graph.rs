//! Payload graphs
//!
//! A payload is an arena of nodes rather than a JSON tree so that the states
//! corruption produces can be represented: NaN and infinite numbers,
//! `undefined` leaves, nodes shared by several parents and reference cycles.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::fmt;

pub type NodeId = usize;

const MAX_DEPTH: usize = 256;

/// A stored number; integers stay exact, only floats can be non-finite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Num {
    Int(i64),
    UInt(u64),
    Float(f64),
}

impl Num {
    pub fn from_json(number: &Number) -> Self {
        if let Some(i) = number.as_i64() {
            Num::Int(i)
        } else if let Some(u) = number.as_u64() {
            Num::UInt(u)
        } else {
            Num::Float(number.as_f64().unwrap_or(f64::NAN))
        }
    }

    /// `None` for NaN and the infinities
    pub fn to_json(self) -> Option<Number> {
        match self {
            Num::Int(i) => Some(i.into()),
            Num::UInt(u) => Some(u.into()),
            Num::Float(f) => Number::from_f64(f),
        }
    }

    /// Parse number text, keeping integer literals exact
    pub fn parse(text: &str) -> Option<Self> {
        if !text.contains(|c| matches!(c, '.' | 'e' | 'E')) {
            if let Ok(i) = text.parse::<i64>() {
                return Some(Num::Int(i));
            }
            if let Ok(u) = text.parse::<u64>() {
                return Some(Num::UInt(u));
            }
        }
        text.parse::<f64>().ok().map(Num::Float)
    }

    pub fn is_finite(self) -> bool {
        match self {
            Num::Float(f) => f.is_finite(),
            Num::Int(_) | Num::UInt(_) => true,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::UInt(u) => u as f64,
            Num::Float(f) => f,
        }
    }

    pub fn as_i64(self) -> Option<i64> {
        match self {
            Num::Int(i) => Some(i),
            Num::UInt(u) => i64::try_from(u).ok(),
            Num::Float(f) if f.is_finite() => Some(f as i64),
            Num::Float(_) => None,
        }
    }
}

impl From<i64> for Num {
    fn from(value: i64) -> Self {
        Num::Int(value)
    }
}

/// Computed values: whole floats within the exact range become integers
impl From<f64> for Num {
    fn from(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < 9.0e15 {
            Num::Int(value as i64)
        } else {
            Num::Float(value)
        }
    }
}

impl fmt::Display for Num {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Num::Int(i) => write!(f, "{i}"),
            Num::UInt(u) => write!(f, "{u}"),
            Num::Float(x) => match Num::from(x) {
                Num::Int(i) => write!(f, "{i}"),
                _ => write!(f, "{x}"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Null,
    Undefined,
    Bool(bool),
    Number(Num),
    Text(String),
    List(Vec<NodeId>),
    Map(IndexMap<String, NodeId>),
}

impl Node {
    pub fn is_container(&self) -> bool {
        matches!(self, Node::List(_) | Node::Map(_))
    }

    /// Leaves that cannot be written as JSON
    pub fn is_non_serializable(&self) -> bool {
        match self {
            Node::Undefined => true,
            Node::Number(n) => !n.is_finite(),
            _ => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Null => "null",
            Node::Undefined => "undefined",
            Node::Bool(_) => "bool",
            Node::Number(_) => "number",
            Node::Text(_) => "text",
            Node::List(_) => "list",
            Node::Map(_) => "map",
        }
    }
}

/// One step from a container to a child
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    Key(String),
    Index(usize),
}

/// Location of a node, rendered as `project.components[2]`
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodePath(pub Vec<Edge>);

impl NodePath {
    fn child(&self, edge: Edge) -> Self {
        let mut path = self.clone();
        path.0.push(edge);
        path
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, edge) in self.0.iter().enumerate() {
            match edge {
                Edge::Key(key) if i == 0 => write!(f, "{key}")?,
                Edge::Key(key) => write!(f, ".{key}")?,
                Edge::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("reference cycle at {0}")]
    Cycle(NodePath),

    #[error("non-finite number at {0}")]
    NonFinite(NodePath),

    #[error("undefined value at {0}")]
    Undefined(NodePath),

    #[error("payload nests deeper than {MAX_DEPTH} levels")]
    TooDeep,

    #[error("unparsable payload at byte {offset}: {message}")]
    Parse { offset: usize, message: String },
}

/// What a depth-first walk reports
#[derive(Debug, Clone, PartialEq)]
pub enum WalkEvent {
    /// A non-container node reached along `path`
    Leaf { id: NodeId, path: NodePath },
    /// An edge into a node already on the current branch
    BackEdge {
        parent: NodeId,
        edge: Edge,
        path: NodePath,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGraph {
    nodes: Vec<Node>,
    root: NodeId,
}

impl DataGraph {
    pub fn new(root: Node) -> Self {
        Self {
            nodes: vec![root],
            root: 0,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = id;
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Number of nodes in the arena, reachable or not
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    pub fn from_value(value: &Value) -> Self {
        let mut graph = Self {
            nodes: Vec::new(),
            root: 0,
        };
        graph.root = graph.add_value(value);
        graph
    }

    /// Add `value` as a detached subtree
    pub fn add_value(&mut self, value: &Value) -> NodeId {
        let node = match value {
            Value::Null => Node::Null,
            Value::Bool(b) => Node::Bool(*b),
            Value::Number(n) => Node::Number(Num::from_json(n)),
            Value::String(s) => Node::Text(s.clone()),
            Value::Array(items) => {
                let children = items.iter().map(|item| self.add_value(item)).collect();
                Node::List(children)
            }
            Value::Object(map) => {
                let children = map
                    .iter()
                    .map(|(k, v)| (k.clone(), self.add_value(v)))
                    .collect();
                Node::Map(children)
            }
        };
        self.add(node)
    }

    /// Child of a map node
    pub fn get(&self, map: NodeId, key: &str) -> Option<NodeId> {
        match &self.nodes[map] {
            Node::Map(entries) => entries.get(key).copied(),
            _ => None,
        }
    }

    /// Follow map keys from the root
    pub fn lookup(&self, keys: &[&str]) -> Option<NodeId> {
        keys.iter().try_fold(self.root, |id, key| self.get(id, key))
    }

    /// Set `key` on a map node; returns false when `map` is not a map
    pub fn set(&mut self, map: NodeId, key: &str, child: NodeId) -> bool {
        match &mut self.nodes[map] {
            Node::Map(entries) => {
                entries.insert(key.to_string(), child);
                true
            }
            _ => false,
        }
    }

    /// Detach the child reached from `parent` over `edge`
    pub fn remove_edge(&mut self, parent: NodeId, edge: &Edge) -> bool {
        match (&mut self.nodes[parent], edge) {
            (Node::Map(entries), Edge::Key(key)) => entries.shift_remove(key).is_some(),
            (Node::List(items), Edge::Index(index)) if *index < items.len() => {
                items.remove(*index);
                true
            }
            _ => false,
        }
    }

    /// Depth-first walk tracking only the current branch, so a node shared by
    /// two parents is visited twice while a node reachable from itself is
    /// reported as a back edge and not descended into
    pub fn walk(&self, mut visit: impl FnMut(WalkEvent)) {
        let mut on_branch = vec![false; self.nodes.len()];
        self.walk_from(self.root, &NodePath::default(), &mut on_branch, &mut visit);
    }

    fn walk_from(
        &self,
        id: NodeId,
        path: &NodePath,
        on_branch: &mut [bool],
        visit: &mut impl FnMut(WalkEvent),
    ) {
        let children: Vec<(Edge, NodeId)> = match &self.nodes[id] {
            Node::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, child)| (Edge::Index(i), *child))
                .collect(),
            Node::Map(entries) => entries
                .iter()
                .map(|(k, child)| (Edge::Key(k.clone()), *child))
                .collect(),
            _ => {
                visit(WalkEvent::Leaf {
                    id,
                    path: path.clone(),
                });
                return;
            }
        };

        on_branch[id] = true;
        for (edge, child) in children {
            let child_path = path.child(edge.clone());
            if on_branch[child] {
                visit(WalkEvent::BackEdge {
                    parent: id,
                    edge,
                    path: child_path,
                });
            } else {
                self.walk_from(child, &child_path, on_branch, visit);
            }
        }
        on_branch[id] = false;
    }

    /// Convert to JSON, failing on anything JSON cannot hold
    pub fn to_value(&self) -> Result<Value, GraphError> {
        let mut on_branch = vec![false; self.nodes.len()];
        self.value_at(self.root, &NodePath::default(), &mut on_branch, 0)
    }

    fn value_at(
        &self,
        id: NodeId,
        path: &NodePath,
        on_branch: &mut [bool],
        depth: usize,
    ) -> Result<Value, GraphError> {
        if depth > MAX_DEPTH {
            return Err(GraphError::TooDeep);
        }
        if on_branch[id] {
            return Err(GraphError::Cycle(path.clone()));
        }
        let value = match &self.nodes[id] {
            Node::Null => Value::Null,
            Node::Undefined => return Err(GraphError::Undefined(path.clone())),
            Node::Bool(b) => Value::Bool(*b),
            Node::Number(n) => n
                .to_json()
                .map(Value::Number)
                .ok_or_else(|| GraphError::NonFinite(path.clone()))?,
            Node::Text(s) => Value::String(s.clone()),
            Node::List(items) => {
                on_branch[id] = true;
                let mut values = Vec::with_capacity(items.len());
                for (i, child) in items.iter().enumerate() {
                    values.push(self.value_at(
                        *child,
                        &path.child(Edge::Index(i)),
                        on_branch,
                        depth + 1,
                    )?);
                }
                on_branch[id] = false;
                Value::Array(values)
            }
            Node::Map(entries) => {
                on_branch[id] = true;
                let mut map = Map::new();
                for (key, child) in entries {
                    let value = self.value_at(
                        *child,
                        &path.child(Edge::Key(key.clone())),
                        on_branch,
                        depth + 1,
                    )?;
                    map.insert(key.clone(), value);
                }
                on_branch[id] = false;
                Value::Object(map)
            }
        };
        Ok(value)
    }

    /// Parse JSON text that may also contain `NaN`, `Infinity`, `-Infinity`
    /// and `undefined`
    pub fn parse_lenient(text: &str) -> Result<Self, GraphError> {
        let mut parser = LenientParser {
            bytes: text.as_bytes(),
            pos: 0,
            graph: DataGraph {
                nodes: Vec::new(),
                root: 0,
            },
        };
        let root = parser.value(0)?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters"));
        }
        parser.graph.root = root;
        Ok(parser.graph)
    }
}

struct LenientParser<'a> {
    bytes: &'a [u8],
    pos: usize,
    graph: DataGraph,
}

impl LenientParser<'_> {
    fn error(&self, message: &str) -> GraphError {
        GraphError::Parse {
            offset: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| b.is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.bytes[self.pos..].starts_with(word.as_bytes()) {
            self.pos += word.len();
            true
        } else {
            false
        }
    }

    fn value(&mut self, depth: usize) -> Result<NodeId, GraphError> {
        if depth > MAX_DEPTH {
            return Err(GraphError::TooDeep);
        }
        self.skip_ws();
        let next = self.bytes.get(self.pos).copied();
        let node = match next {
            None => return Err(self.error("unexpected end of input")),
            Some(b'{') => return self.map(depth),
            Some(b'[') => return self.list(depth),
            Some(b'"') => Node::Text(self.string()?),
            Some(b't') if self.eat_word("true") => Node::Bool(true),
            Some(b'f') if self.eat_word("false") => Node::Bool(false),
            Some(b'n') if self.eat_word("null") => Node::Null,
            Some(b'u') if self.eat_word("undefined") => Node::Undefined,
            Some(b'N') if self.eat_word("NaN") => Node::Number(Num::Float(f64::NAN)),
            Some(b'I') if self.eat_word("Infinity") => Node::Number(Num::Float(f64::INFINITY)),
            Some(b'-') if self.eat_word("-Infinity") => {
                Node::Number(Num::Float(f64::NEG_INFINITY))
            }
            Some(b'-' | b'0'..=b'9') => Node::Number(self.number()?),
            Some(_) => return Err(self.error("unexpected character")),
        };
        Ok(self.graph.add(node))
    }

    fn map(&mut self, depth: usize) -> Result<NodeId, GraphError> {
        self.pos += 1;
        let mut entries = IndexMap::new();
        self.skip_ws();
        if self.bytes.get(self.pos) == Some(&b'}') {
            self.pos += 1;
            return Ok(self.graph.add(Node::Map(entries)));
        }
        loop {
            self.skip_ws();
            if self.bytes.get(self.pos) != Some(&b'"') {
                return Err(self.error("expected object key"));
            }
            let key = self.string()?;
            self.skip_ws();
            if self.bytes.get(self.pos) != Some(&b':') {
                return Err(self.error("expected ':'"));
            }
            self.pos += 1;
            let child = self.value(depth + 1)?;
            entries.insert(key, child);
            self.skip_ws();
            match self.bytes.get(self.pos) {
                Some(b',') => self.pos += 1,
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(self.graph.add(Node::Map(entries)));
                }
                _ => return Err(self.error("expected ',' or '}'")),
            }
        }
    }

    fn list(&mut self, depth: usize) -> Result<NodeId, GraphError> {
        self.pos += 1;
        let mut items = Vec::new();
        self.skip_ws();
        if self.bytes.get(self.pos) == Some(&b']') {
            self.pos += 1;
            return Ok(self.graph.add(Node::List(items)));
        }
        loop {
            items.push(self.value(depth + 1)?);
            self.skip_ws();
            match self.bytes.get(self.pos) {
                Some(b',') => self.pos += 1,
                Some(b']') => {
                    self.pos += 1;
                    return Ok(self.graph.add(Node::List(items)));
                }
                _ => return Err(self.error("expected ',' or ']'")),
            }
        }
    }

    fn number(&mut self) -> Result<Num, GraphError> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|b| matches!(b, b'-' | b'+' | b'.' | b'e' | b'E' | b'0'..=b'9'))
        {
            self.pos += 1;
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(Num::parse)
            .ok_or_else(|| self.error("malformed number"))
    }

    fn string(&mut self) -> Result<String, GraphError> {
        // The opening quote has been seen but not consumed
        let start = self.pos;
        let end = {
            let mut i = start + 1;
            let mut escaped = false;
            loop {
                match self.bytes.get(i) {
                    None => return Err(self.error("unterminated string")),
                    Some(b'\\') if !escaped => escaped = true,
                    Some(b'"') if !escaped => break i,
                    Some(_) => escaped = false,
                }
                i += 1;
            }
        };
        let literal = std::str::from_utf8(&self.bytes[start..=end])
            .map_err(|_| self.error("invalid UTF-8 in string"))?;
        let text = serde_json::from_str::<String>(literal)
            .map_err(|e| self.error(&format!("bad string literal: {e}")))?;
        self.pos = end + 1;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip() {
        let value = json!({ "a": [1, 2.5, "x", null, true], "b": { "c": {} } });
        assert_eq!(DataGraph::from_value(&value).to_value().unwrap(), value);
    }

    #[test]
    fn lenient_parse_accepts_non_json_scalars() {
        let graph =
            DataGraph::parse_lenient(r#"{"sensors": NaN, "locations": undefined, "x": -Infinity}"#)
                .unwrap();
        let sensors = graph.lookup(&["sensors"]).unwrap();
        assert!(graph.node(sensors).is_non_serializable());
        assert!(matches!(
            graph.to_value(),
            Err(GraphError::NonFinite(_)) | Err(GraphError::Undefined(_))
        ));
    }

    #[test]
    fn lenient_parse_rejects_garbage() {
        assert!(matches!(
            DataGraph::parse_lenient("{\"a\": }"),
            Err(GraphError::Parse { .. })
        ));
        assert!(DataGraph::parse_lenient("[1, 2] x").is_err());
        assert!(DataGraph::parse_lenient("\"open").is_err());
    }

    #[test]
    fn lenient_parse_handles_escapes() {
        let graph = DataGraph::parse_lenient(r#"{"q": "say \"hi\" é"}"#).unwrap();
        assert_eq!(graph.to_value().unwrap(), json!({ "q": "say \"hi\" é" }));
    }

    #[test]
    fn shared_nodes_are_not_cycles() {
        let mut graph = DataGraph::new(Node::Map(IndexMap::new()));
        let shared = graph.add_value(&json!({ "v": 1 }));
        let root = graph.root();
        graph.set(root, "left", shared);
        graph.set(root, "right", shared);

        let mut back_edges = 0;
        graph.walk(|event| {
            if matches!(event, WalkEvent::BackEdge { .. }) {
                back_edges += 1;
            }
        });
        assert_eq!(back_edges, 0);
        assert_eq!(
            graph.to_value().unwrap(),
            json!({ "left": { "v": 1 }, "right": { "v": 1 } })
        );
    }

    #[test]
    fn cycles_are_reported_with_their_path() {
        let mut graph = DataGraph::from_value(&json!({ "project": {} }));
        let project = graph.lookup(&["project"]).unwrap();
        let root = graph.root();
        graph.set(project, "owner", root);

        let mut found = Vec::new();
        graph.walk(|event| {
            if let WalkEvent::BackEdge { path, .. } = event {
                found.push(path.to_string());
            }
        });
        assert_eq!(found, vec!["project.owner".to_string()]);
        assert!(matches!(graph.to_value(), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn integral_numbers_stay_integers() {
        let graph = DataGraph::from_value(&json!({ "n": 3 }));
        assert_eq!(graph.to_value().unwrap(), json!({ "n": 3 }));
    }

    #[test]
    fn large_integers_keep_every_digit() {
        let value = json!({ "serial": 9007199254740993u64, "big": u64::MAX, "low": i64::MIN, "f": 2.0 });
        assert_eq!(DataGraph::from_value(&value).to_value().unwrap(), value);

        let parsed = DataGraph::parse_lenient(
            r#"{"serial": 9007199254740993, "big": 18446744073709551615, "bad": NaN}"#,
        )
        .unwrap();
        let serial = parsed.lookup(&["serial"]).unwrap();
        assert_eq!(parsed.node(serial), &Node::Number(Num::Int(9007199254740993)));
        let big = parsed.lookup(&["big"]).unwrap();
        assert_eq!(parsed.node(big), &Node::Number(Num::UInt(u64::MAX)));
    }

    #[test]
    fn computed_whole_floats_become_integers() {
        assert_eq!(Num::from(4.0), Num::Int(4));
        assert_eq!(Num::from(4.5), Num::Float(4.5));
        assert!(!Num::from(f64::NAN).is_finite());
        assert_eq!(Num::Float(7.0).to_string(), "7");
        assert_eq!(Num::UInt(u64::MAX).to_string(), "18446744073709551615");
    }
}
