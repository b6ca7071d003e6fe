//! On-disk graph/text bundle loading.
//!
//! A bundle lives under `<root>/<repository>/<branch>/` and consists of
//! `regular_code_bundle/chunks.json`, `regular_code_bundle/dependencies.json`,
//! `sql_bundle/docs/sql_bodies.jsonl` and `sql_bundle/graph/edges.csv`.
//! Every artifact is optional secondary data: a missing or partially
//! malformed file degrades to an empty mapping with a logged warning.
//! Integrity between the artifacts is checked at expansion time instead.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

/// One code chunk. Key casings vary across bundle producers, so every
/// field carries its aliases and is normalized exactly once, here.
#[derive(Debug, Clone, Deserialize)]
pub struct CodeChunk {
    #[serde(alias = "Id", alias = "id")]
    pub id: String,
    #[serde(default, alias = "File", alias = "file", alias = "path")]
    pub file: Option<String>,
    #[serde(default, alias = "Text", alias = "text", alias = "body")]
    pub text: String,
    #[serde(default, alias = "Class", alias = "class")]
    pub class: Option<String>,
    #[serde(default, alias = "Member", alias = "member")]
    pub member: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SqlBody {
    #[serde(alias = "Key", alias = "id")]
    pub key: String,
    #[serde(default, alias = "Kind", alias = "type")]
    pub kind: Option<String>,
    #[serde(default, alias = "Schema")]
    pub schema: Option<String>,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default, alias = "Text", alias = "body", alias = "definition")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEdge {
    pub to: String,
    pub relation: String,
}

/// Fully loaded (repository, branch) bundle. Immutable once built.
pub struct LoadedBundle {
    pub chunks: HashMap<String, CodeChunk>,
    pub sql_bodies: HashMap<String, SqlBody>,
    /// Outgoing adjacency. Every directed edge is also indexed in reverse
    /// (relation suffixed `_rev`) so "what references this" walks work.
    pub adjacency: HashMap<String, Vec<GraphEdge>>,
    known_ids: HashSet<String>,
}

impl LoadedBundle {
    pub fn load(dir: &Path) -> Self {
        let chunks = load_chunks(&dir.join("regular_code_bundle").join("chunks.json"));
        let dependencies =
            load_dependencies(&dir.join("regular_code_bundle").join("dependencies.json"));
        let sql_bodies = load_sql_bodies(
            &dir.join("sql_bundle").join("docs").join("sql_bodies.jsonl"),
        );
        let sql_edges = load_edges_csv(&dir.join("sql_bundle").join("graph").join("edges.csv"));

        let mut adjacency: HashMap<String, Vec<GraphEdge>> = HashMap::new();
        let mut add_edge = |from: &str, to: &str, relation: &str| {
            adjacency.entry(from.to_string()).or_default().push(GraphEdge {
                to: to.to_string(),
                relation: relation.to_string(),
            });
            adjacency.entry(to.to_string()).or_default().push(GraphEdge {
                to: from.to_string(),
                relation: format!("{relation}_rev"),
            });
        };
        for (from, targets) in &dependencies {
            for to in targets {
                add_edge(from, to, "depends_on");
            }
        }
        for (from, to, relation) in &sql_edges {
            add_edge(from, to, relation);
        }

        // Raw artifact keys only. The reverse-indexed adjacency map must not
        // feed this set, or a dangling edge target would vouch for itself.
        let mut known_ids: HashSet<String> = HashSet::new();
        known_ids.extend(chunks.keys().cloned());
        known_ids.extend(sql_bodies.keys().cloned());
        known_ids.extend(dependencies.keys().cloned());

        debug!(
            chunks = chunks.len(),
            sql_bodies = sql_bodies.len(),
            adjacency = adjacency.len(),
            "bundle loaded"
        );
        Self {
            chunks,
            sql_bodies,
            adjacency,
            known_ids,
        }
    }

    /// Whether the id appears anywhere in the bundle: chunk store, SQL
    /// store, or as a raw adjacency key.
    pub fn knows(&self, local_id: &str) -> bool {
        self.known_ids.contains(local_id)
    }

    pub fn edges_from(&self, local_id: &str) -> &[GraphEdge] {
        self.adjacency
            .get(local_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

fn load_chunks(path: &Path) -> HashMap<String, CodeChunk> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), %err, "chunks.json unavailable");
            return HashMap::new();
        }
    };
    match serde_json::from_str::<Vec<CodeChunk>>(&raw) {
        Ok(chunks) => chunks.into_iter().map(|c| (c.id.clone(), c)).collect(),
        Err(err) => {
            warn!(path = %path.display(), %err, "chunks.json malformed");
            HashMap::new()
        }
    }
}

fn load_dependencies(path: &Path) -> HashMap<String, Vec<String>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), %err, "dependencies.json unavailable");
            return HashMap::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(deps) => deps,
        Err(err) => {
            warn!(path = %path.display(), %err, "dependencies.json malformed");
            HashMap::new()
        }
    }
}

fn load_sql_bodies(path: &Path) -> HashMap<String, SqlBody> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), %err, "sql_bodies.jsonl unavailable");
            return HashMap::new();
        }
    };
    let mut bodies = HashMap::new();
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<SqlBody>(line) {
            Ok(body) => {
                bodies.insert(body.key.clone(), body);
            }
            Err(err) => {
                warn!(line = line_no + 1, %err, "skipping malformed sql body line");
            }
        }
    }
    bodies
}

/// `from,to,relation` rows; header casings `From`/`To`/`Relation` accepted.
fn load_edges_csv(path: &Path) -> Vec<(String, String, String)> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), %err, "edges.csv unavailable");
            return Vec::new();
        }
    };
    let mut lines = raw.lines();
    let header = match lines.next() {
        Some(header) => header,
        None => return Vec::new(),
    };
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();
    let col = |name: &str| columns.iter().position(|c| c == name);
    let (from_col, to_col, rel_col) = match (col("from"), col("to"), col("relation")) {
        (Some(f), Some(t), Some(r)) => (f, t, r),
        _ => {
            warn!(path = %path.display(), header, "edges.csv header missing from/to/relation");
            return Vec::new();
        }
    };

    let mut edges = Vec::new();
    for (line_no, line) in lines.enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        match (fields.get(from_col), fields.get(to_col), fields.get(rel_col)) {
            (Some(from), Some(to), Some(rel)) if !from.is_empty() && !to.is_empty() => {
                edges.push((from.to_string(), to.to_string(), rel.to_string()));
            }
            _ => warn!(line = line_no + 2, "skipping malformed edges.csv row"),
        }
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_bundle(dir: &Path) {
        let code = dir.join("regular_code_bundle");
        fs::create_dir_all(&code).unwrap();
        fs::write(
            code.join("chunks.json"),
            r#"[
                {"Id": "A.cs#Cls", "File": "src/A.cs", "Text": "class Cls {}", "Class": "Cls"},
                {"Id": "B.cs#Other", "File": "src/B.cs", "Text": "class Other {}"}
            ]"#,
        )
        .unwrap();
        fs::write(
            code.join("dependencies.json"),
            r#"{"A.cs#Cls": ["B.cs#Other"]}"#,
        )
        .unwrap();

        let docs = dir.join("sql_bundle").join("docs");
        fs::create_dir_all(&docs).unwrap();
        fs::write(
            docs.join("sql_bodies.jsonl"),
            concat!(
                r#"{"key": "dbo.GetOrders", "kind": "proc", "schema": "dbo", "name": "GetOrders", "text": "SELECT 1"}"#,
                "\n",
                "this line is not json\n",
            ),
        )
        .unwrap();

        let graph = dir.join("sql_bundle").join("graph");
        fs::create_dir_all(&graph).unwrap();
        fs::write(
            graph.join("edges.csv"),
            "From,To,Relation\nA.cs#Cls,dbo.GetOrders,calls\n",
        )
        .unwrap();
    }

    #[test]
    fn loads_all_artifacts_and_indexes_reverse_edges() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let bundle = LoadedBundle::load(dir.path());

        assert_eq!(bundle.chunks.len(), 2);
        assert_eq!(bundle.sql_bodies.len(), 1);
        assert!(bundle.knows("A.cs#Cls"));
        assert!(bundle.knows("dbo.GetOrders"));

        let out: Vec<&str> = bundle
            .edges_from("A.cs#Cls")
            .iter()
            .map(|e| e.to.as_str())
            .collect();
        assert!(out.contains(&"B.cs#Other"));
        assert!(out.contains(&"dbo.GetOrders"));

        let back = bundle.edges_from("B.cs#Other");
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].relation, "depends_on_rev");
    }

    #[test]
    fn missing_artifacts_degrade_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = LoadedBundle::load(dir.path());
        assert!(bundle.chunks.is_empty());
        assert!(bundle.sql_bodies.is_empty());
        assert!(bundle.adjacency.is_empty());
        assert!(!bundle.knows("anything"));
    }

    #[test]
    fn malformed_sql_lines_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path());
        let bundle = LoadedBundle::load(dir.path());
        assert!(bundle.sql_bodies.contains_key("dbo.GetOrders"));
    }

    #[test]
    fn edges_csv_header_aliases_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let graph = dir.path().join("sql_bundle").join("graph");
        fs::create_dir_all(&graph).unwrap();
        fs::write(graph.join("edges.csv"), "from,to,relation\nx,y,calls\n").unwrap();
        let bundle = LoadedBundle::load(dir.path());
        assert_eq!(bundle.edges_from("x")[0].to, "y");
        assert_eq!(bundle.edges_from("y")[0].relation, "calls_rev");
    }
}
