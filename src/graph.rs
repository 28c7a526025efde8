//! Architecture graph model.
//!
//! [`build_graph`] turns a partition into an abstract node/edge graph for
//! diagram renderers. Nodes are subsystems tagged with a [`Role`]; `flow`
//! edges come from a small per-framework table of typical data flow and
//! are only emitted when both endpoints exist. [`augment_with_related`]
//! adds undirected-in-spirit `related` edges from the relationship
//! inferencer.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::classify::Framework;
use crate::models::Subsystem;
use crate::partition::{role_for_name, Role};
use crate::related::related_subsystems;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// The subsystem name, unique within a graph.
    pub id: String,
    pub label: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Flow,
    Related,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    pub fn has_node(&self, id: &str) -> bool {
        self.nodes.iter().any(|n| n.id == id)
    }

    /// Whether any edge joins `a` and `b`, in either direction.
    pub fn connects(&self, a: &str, b: &str) -> bool {
        self.edges
            .iter()
            .any(|e| (e.from == a && e.to == b) || (e.from == b && e.to == a))
    }
}

type FlowTable = &'static [(&'static str, &'static str)];

static SVELTE_FLOW: FlowTable = &[
    ("Routes", "Components"),
    ("Components", "Stores"),
    ("Components", "Services"),
    ("Stores", "Services"),
];

static NEXTJS_FLOW: FlowTable = &[
    ("Pages", "Components"),
    ("Pages", "Api"),
    ("Components", "Hooks"),
    ("Hooks", "Api"),
];

static NUXT_FLOW: FlowTable = &[
    ("Pages", "Layouts"),
    ("Pages", "Components"),
    ("Components", "Composables"),
    ("Composables", "Server"),
];

static FRONTEND_FLOW: FlowTable = &[
    ("Pages", "Components"),
    ("Components", "Hooks"),
    ("Components", "Services"),
    ("Hooks", "Services"),
];

static ANGULAR_FLOW: FlowTable = &[("Modules", "Components"), ("Components", "Services")];

static EXPRESS_FLOW: FlowTable = &[
    ("Routes", "Middleware"),
    ("Routes", "Controllers"),
    ("Controllers", "Models"),
];

static DJANGO_FLOW: FlowTable = &[
    ("Routes", "Views"),
    ("Views", "Templates"),
    ("Views", "Models"),
];

static RAILS_FLOW: FlowTable = &[("Controllers", "Views"), ("Controllers", "Models")];

static LARAVEL_FLOW: FlowTable = &[
    ("Routes", "Controllers"),
    ("Controllers", "Views"),
    ("Controllers", "Models"),
];

static SPRING_FLOW: FlowTable = &[
    ("Controllers", "Services"),
    ("Services", "Repositories"),
    ("Repositories", "Models"),
];

static RUST_FLOW: FlowTable = &[("Binaries", "Library"), ("Binaries", "Crates")];

static GO_FLOW: FlowTable = &[
    ("Commands", "Internal"),
    ("Commands", "Packages"),
    ("Internal", "Packages"),
];

static PYTHON_FLOW: FlowTable = &[
    ("Entry Points", "Services"),
    ("Entry Points", "Models"),
    ("Services", "Models"),
];

static GENERIC_FLOW: FlowTable = &[
    ("Routes", "Components"),
    ("Pages", "Components"),
    ("Routes", "Services"),
    ("Components", "Services"),
    ("Views", "Services"),
    ("Stores", "Services"),
    ("Services", "Models"),
];

fn flow_table(framework: Framework) -> FlowTable {
    match framework {
        Framework::Svelte => SVELTE_FLOW,
        Framework::NextJs => NEXTJS_FLOW,
        Framework::Nuxt => NUXT_FLOW,
        Framework::Vue | Framework::React => FRONTEND_FLOW,
        Framework::Angular => ANGULAR_FLOW,
        Framework::Express | Framework::Node => EXPRESS_FLOW,
        Framework::Django => DJANGO_FLOW,
        Framework::Rails => RAILS_FLOW,
        Framework::Laravel => LARAVEL_FLOW,
        Framework::Spring => SPRING_FLOW,
        Framework::Rust => RUST_FLOW,
        Framework::Go => GO_FLOW,
        Framework::Python => PYTHON_FLOW,
        Framework::Unknown => GENERIC_FLOW,
    }
}

/// Builds the graph for a partition. Missing endpoints silently drop the
/// corresponding edge.
pub fn build_graph(subsystems: &[Subsystem], framework: Framework) -> Graph {
    let nodes: Vec<Node> = subsystems
        .iter()
        .map(|s| Node {
            id: s.name.clone(),
            label: s.name.clone(),
            role: role_for_name(&s.name, framework),
        })
        .collect();

    let present: HashSet<&str> = subsystems.iter().map(|s| s.name.as_str()).collect();
    let edges = flow_table(framework)
        .iter()
        .filter(|(from, to)| present.contains(from) && present.contains(to))
        .map(|(from, to)| Edge {
            from: from.to_string(),
            to: to.to_string(),
            kind: EdgeKind::Flow,
        })
        .collect();

    Graph { nodes, edges }
}

/// Adds a `related` edge for each inferred relationship between two
/// subsystems the graph does not already connect.
pub fn augment_with_related(graph: &mut Graph, subsystems: &[Subsystem], max_results: usize) {
    for subsystem in subsystems {
        if !graph.has_node(&subsystem.name) {
            continue;
        }
        for other in related_subsystems(subsystem, subsystems, max_results) {
            if !graph.has_node(&other) || graph.connects(&subsystem.name, &other) {
                continue;
            }
            graph.edges.push(Edge {
                from: subsystem.name.clone(),
                to: other,
                kind: EdgeKind::Related,
            });
        }
    }
}
