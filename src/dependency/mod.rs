//! Dependency resolution for environment switching: parses `"a -> b"` edges,
//! detects cycles, and groups services into dependency-ordered levels.

use std::collections::{HashMap, HashSet};

use crate::error::GzhError;

/// A parsed `from -> to` edge. Kept as a pair rather than the original
/// string so downstream code never has to re-split it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

/// Splits on the literal `" -> "` separator and trims both sides; rejects
/// anything that doesn't produce exactly two non-empty names.
pub fn parse_dependency(raw: &str) -> Result<Edge, GzhError> {
    let Some((from, to)) = raw.split_once(" -> ") else {
        return Err(GzhError::ConfigInvalid(format!(
            "dependency must be in the form \"a -> b\": {raw}"
        )));
    };
    let from = from.trim();
    let to = to.trim();
    if from.is_empty() || to.is_empty() {
        return Err(GzhError::ConfigInvalid(format!(
            "dependency must name two services: {raw}"
        )));
    }
    Ok(Edge {
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Services grouped by dependency level: level 0 has no dependencies,
/// level N depends only on services at levels < N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceGroup {
    pub level: usize,
    pub services: Vec<String>,
}

#[derive(Debug, Default)]
struct Graph {
    nodes: Vec<String>,
    edges: Vec<Edge>,
}

impl Graph {
    fn node_set(&self) -> HashSet<&str> {
        let mut set: HashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        for edge in &self.edges {
            set.insert(&edge.from);
            set.insert(&edge.to);
        }
        set
    }

    fn adjacency(&self) -> HashMap<&str, Vec<&str>> {
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.edges {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
        }
        adjacency
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Resolves declared services and their dependency edges into dependency
/// ordered levels, after verifying the graph is acyclic and references only
/// declared services.
pub struct DependencyResolver {
    graph: Graph,
}

impl DependencyResolver {
    pub fn new(services: Vec<String>, edges: Vec<Edge>) -> Self {
        Self {
            graph: Graph {
                nodes: services,
                edges,
            },
        }
    }

    /// Three-color DFS: a back-edge into a `Gray` node is a cycle, reported
    /// with the specific edge that closes it.
    pub fn check_cycles(&self) -> Result<(), GzhError> {
        let adjacency = self.graph.adjacency();
        let mut colors: HashMap<&str, Color> = self
            .graph
            .node_set()
            .into_iter()
            .map(|n| (n, Color::White))
            .collect();

        let nodes: Vec<&str> = colors.keys().copied().collect();
        for start in nodes {
            if colors[start] == Color::White {
                self.visit(start, &adjacency, &mut colors)?;
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &self,
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        colors: &mut HashMap<&'a str, Color>,
    ) -> Result<(), GzhError> {
        colors.insert(node, Color::Gray);
        if let Some(neighbors) = adjacency.get(node) {
            for &next in neighbors {
                match colors.get(next).copied().unwrap_or(Color::White) {
                    Color::White => self.visit(next, adjacency, colors)?,
                    Color::Gray => {
                        return Err(GzhError::CircularDependency {
                            from: node.to_string(),
                            to: next.to_string(),
                        })
                    }
                    Color::Black => {}
                }
            }
        }
        colors.insert(node, Color::Black);
        Ok(())
    }

    /// Validates that every edge references a declared service.
    pub fn check_unknown_services(&self) -> Result<(), GzhError> {
        let declared: HashSet<&str> = self.graph.nodes.iter().map(String::as_str).collect();
        for edge in &self.graph.edges {
            if !declared.contains(edge.from.as_str()) {
                return Err(GzhError::ConfigInvalid(format!(
                    "dependency references unknown service: {}",
                    edge.from
                )));
            }
            if !declared.contains(edge.to.as_str()) {
                return Err(GzhError::ConfigInvalid(format!(
                    "dependency references unknown service: {}",
                    edge.to
                )));
            }
        }
        Ok(())
    }

    /// Kahn's algorithm with lexicographic tie-break: within a level,
    /// services are ordered by name so the output is deterministic run to
    /// run regardless of declaration or hash-map iteration order.
    pub fn resolve(&self) -> Result<Vec<ServiceGroup>, GzhError> {
        self.check_unknown_services()?;
        self.check_cycles()?;

        // `to` depends on `from`: an edge "a -> b" means b must switch after a.
        let mut in_degree: HashMap<&str, usize> =
            self.graph.nodes.iter().map(|n| (n.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &self.graph.edges {
            *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
            dependents.entry(edge.from.as_str()).or_default().push(&edge.to);
        }

        let mut groups = Vec::new();
        let mut remaining = in_degree.clone();
        let mut processed: HashSet<&str> = HashSet::new();

        while processed.len() < self.graph.nodes.len() {
            let mut frontier: Vec<&str> = remaining
                .iter()
                .filter(|(node, &deg)| deg == 0 && !processed.contains(*node))
                .map(|(&node, _)| node)
                .collect();
            frontier.sort_unstable();

            if frontier.is_empty() {
                return Err(GzhError::ConfigInvalid(
                    "dependency graph could not be fully ordered".to_string(),
                ));
            }

            for &node in &frontier {
                processed.insert(node);
                if let Some(next) = dependents.get(node) {
                    for &dependent in next {
                        if let Some(deg) = remaining.get_mut(dependent) {
                            *deg = deg.saturating_sub(1);
                        }
                    }
                }
            }

            for node in &frontier {
                remaining.remove(node);
            }

            groups.push(ServiceGroup {
                level: groups.len(),
                services: frontier.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(groups)
    }
}
