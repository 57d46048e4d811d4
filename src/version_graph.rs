use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;

use crate::error::Error;

/// One edge traversal in a resolved patch path: a single patch archive
/// `{from}_to_{to}.tar.xz` applied in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchHop {
    pub from: String,
    pub to: String,
}

/// Directed graph of known versions; an edge means a published patch from
/// one version to the next is obtainable from the origin.
///
/// Published graphs may carry parallel edges (a patch can be superseded);
/// all edges are unweighted so duplicates collapse for pathfinding.
/// Neighbor sets are ordered, which makes shortest-path tie-breaking stable
/// for a fixed graph.
#[derive(Debug, Clone, Default)]
pub struct VersionGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl VersionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, version: &str) {
        self.edges.entry(version.to_string()).or_default();
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.add_vertex(to);
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
    }

    pub fn contains(&self, version: &str) -> bool {
        self.edges.contains_key(version)
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Minimum-hop path from `from` to `to` as an ordered hop sequence.
    ///
    /// All patches cost the same regardless of size, so a plain BFS finds an
    /// optimal path. Returns `None` when either vertex is unknown or the two
    /// are disconnected; `Some(vec![])` when `from == to`.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<PatchHop>> {
        if !self.contains(from) || !self.contains(to) {
            return None;
        }
        if from == to {
            return Some(Vec::new());
        }

        let mut predecessor: BTreeMap<&str, &str> = BTreeMap::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(from);

        while let Some(current) = queue.pop_front() {
            let Some(neighbors) = self.edges.get(current) else {
                continue;
            };
            for next in neighbors {
                let next = next.as_str();
                if next == from || predecessor.contains_key(next) {
                    continue;
                }
                predecessor.insert(next, current);
                if next == to {
                    return Some(backtrack(&predecessor, from, to));
                }
                queue.push_back(next);
            }
        }

        None
    }

    /// Parse the `versions.gml` text format (graph-modeling-language as
    /// written by the repository server).
    pub fn from_gml(text: &str) -> Result<Self, Error> {
        let tokens = lex_gml(text);
        let mut labels: BTreeMap<i64, String> = BTreeMap::new();
        let mut raw_edges: Vec<(i64, i64)> = Vec::new();

        let mut pos = 0;
        while pos < tokens.len() {
            match &tokens[pos] {
                GmlToken::Word(w) if w == "node" => {
                    let block = parse_block(&tokens, &mut pos)?;
                    let id = block_int(&block, "node", "id")?;
                    let label = block_string(&block, "node", "label")?;
                    labels.insert(id, label);
                }
                GmlToken::Word(w) if w == "edge" => {
                    let block = parse_block(&tokens, &mut pos)?;
                    let source = block_int(&block, "edge", "source")?;
                    let target = block_int(&block, "edge", "target")?;
                    raw_edges.push((source, target));
                }
                _ => pos += 1,
            }
        }

        let mut graph = VersionGraph::new();
        for label in labels.values() {
            graph.add_vertex(label);
        }
        for (source, target) in raw_edges {
            let from = labels
                .get(&source)
                .ok_or_else(|| Error::GraphFormat(format!("edge source {source} has no node")))?;
            let to = labels
                .get(&target)
                .ok_or_else(|| Error::GraphFormat(format!("edge target {target} has no node")))?;
            graph.add_edge(from, to);
        }
        Ok(graph)
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::from_gml(&text)
    }

    /// Render in the same GML dialect `from_gml` accepts.
    pub fn to_gml(&self) -> String {
        let ids: BTreeMap<&str, usize> = self
            .edges
            .keys()
            .enumerate()
            .map(|(i, v)| (v.as_str(), i))
            .collect();

        let mut out = String::from("graph [\n  directed 1\n");
        for (version, id) in &ids {
            out.push_str(&format!(
                "  node [\n    id {id}\n    label \"{version}\"\n  ]\n"
            ));
        }
        for (from, neighbors) in &self.edges {
            for to in neighbors {
                out.push_str(&format!(
                    "  edge [\n    source {}\n    target {}\n  ]\n",
                    ids[from.as_str()],
                    ids[to.as_str()]
                ));
            }
        }
        out.push_str("]\n");
        out
    }
}

fn backtrack(predecessor: &BTreeMap<&str, &str>, from: &str, to: &str) -> Vec<PatchHop> {
    let mut hops = Vec::new();
    let mut current = to;
    while current != from {
        let prev = predecessor[current];
        hops.push(PatchHop {
            from: prev.to_string(),
            to: current.to_string(),
        });
        current = prev;
    }
    hops.reverse();
    hops
}

#[derive(Debug, PartialEq)]
enum GmlToken {
    Open,
    Close,
    Word(String),
    Str(String),
    Int(i64),
}

fn lex_gml(text: &str) -> Vec<GmlToken> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            '[' => {
                chars.next();
                tokens.push(GmlToken::Open);
            }
            ']' => {
                chars.next();
                tokens.push(GmlToken::Close);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                for c in chars.by_ref() {
                    if c == '"' {
                        break;
                    }
                    s.push(c);
                }
                tokens.push(GmlToken::Str(s));
            }
            c if c.is_whitespace() => {
                chars.next();
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '[' || c == ']' || c == '"' {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                match word.parse::<i64>() {
                    Ok(n) => tokens.push(GmlToken::Int(n)),
                    Err(_) => tokens.push(GmlToken::Word(word)),
                }
            }
        }
    }

    tokens
}

/// Consume `<keyword> [ key value ... ]` starting at `pos` (which points at
/// the keyword) and return the key/value pairs. Nested blocks are skipped.
fn parse_block<'a>(
    tokens: &'a [GmlToken],
    pos: &mut usize,
) -> Result<Vec<(&'a str, &'a GmlToken)>, Error> {
    let keyword = match &tokens[*pos] {
        GmlToken::Word(w) => w.clone(),
        _ => unreachable!("caller checked the keyword token"),
    };
    *pos += 1;
    if tokens.get(*pos) != Some(&GmlToken::Open) {
        return Err(Error::GraphFormat(format!("`{keyword}` not followed by `[`")));
    }
    *pos += 1;

    let mut pairs = Vec::new();
    while let Some(token) = tokens.get(*pos) {
        match token {
            GmlToken::Close => {
                *pos += 1;
                return Ok(pairs);
            }
            GmlToken::Word(key) => {
                *pos += 1;
                match tokens.get(*pos) {
                    Some(GmlToken::Open) => skip_block(tokens, pos)?,
                    Some(value) => {
                        pairs.push((key.as_str(), value));
                        *pos += 1;
                    }
                    None => break,
                }
            }
            _ => {
                return Err(Error::GraphFormat(format!(
                    "unexpected token inside `{keyword}` block"
                )))
            }
        }
    }

    Err(Error::GraphFormat(format!("unterminated `{keyword}` block")))
}

fn skip_block(tokens: &[GmlToken], pos: &mut usize) -> Result<(), Error> {
    // pos points at the Open token
    let mut depth = 0usize;
    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        match token {
            GmlToken::Open => depth += 1,
            GmlToken::Close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            _ => {}
        }
    }
    Err(Error::GraphFormat("unterminated nested block".to_string()))
}

fn block_int(pairs: &[(&str, &GmlToken)], block: &str, key: &str) -> Result<i64, Error> {
    match pairs.iter().find(|(k, _)| *k == key) {
        Some((_, GmlToken::Int(n))) => Ok(*n),
        _ => Err(Error::GraphFormat(format!(
            "`{block}` block is missing integer `{key}`"
        ))),
    }
}

fn block_string(pairs: &[(&str, &GmlToken)], block: &str, key: &str) -> Result<String, Error> {
    match pairs.iter().find(|(k, _)| *k == key) {
        Some((_, GmlToken::Str(s))) => Ok(s.clone()),
        Some((_, GmlToken::Int(n))) => Ok(n.to_string()),
        _ => Err(Error::GraphFormat(format!(
            "`{block}` block is missing `{key}`"
        ))),
    }
}
