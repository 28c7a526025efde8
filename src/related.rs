//! Relationship inference between subsystems.
//!
//! Two subsystems are related when they touch the same top-level
//! directories. The score of a candidate is the number of its files whose
//! first path segment also appears among the target's first segments.

use std::collections::HashSet;

use crate::models::Subsystem;

pub const DEFAULT_RELATED_LIMIT: usize = 4;

fn top_segment(path: &str) -> &str {
    path.split('/').next().unwrap_or(path)
}

/// Names of up to `max_results` subsystems related to `target`, highest
/// score first. Zero scores are dropped, `target` itself is never listed
/// and ties keep the order of `all`.
pub fn related_subsystems(target: &Subsystem, all: &[Subsystem], max_results: usize) -> Vec<String> {
    let roots: HashSet<&str> = target.files.iter().map(|f| top_segment(f)).collect();

    let mut scored: Vec<(usize, &Subsystem)> = all
        .iter()
        .filter(|s| s.name != target.name)
        .map(|s| {
            let score = s
                .files
                .iter()
                .filter(|f| roots.contains(top_segment(f)))
                .count();
            (score, s)
        })
        .filter(|(score, _)| *score > 0)
        .collect();

    // sort_by is stable
    scored.sort_by(|a, b| b.0.cmp(&a.0));

    scored
        .into_iter()
        .take(max_results)
        .map(|(_, s)| s.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(name: &str, files: &[&str]) -> Subsystem {
        Subsystem {
            name: name.to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            description: String::new(),
        }
    }

    #[test]
    fn ranks_by_shared_top_level_segments() {
        let target = sub("Routes", &["src/routes/a.ts"]);
        let all = vec![
            target.clone(),
            sub("Docs", &["docs/intro.md"]),
            sub("Components", &["src/components/b.svelte"]),
            sub("Services", &["src/services/c.ts", "src/services/d.ts"]),
        ];
        assert_eq!(
            related_subsystems(&target, &all, DEFAULT_RELATED_LIMIT),
            vec!["Services", "Components"]
        );
    }

    #[test]
    fn ties_keep_input_order() {
        let target = sub("T", &["lib/x.rb"]);
        let all = vec![
            sub("B", &["lib/b.rb"]),
            sub("A", &["lib/a.rb"]),
            sub("C", &["lib/c.rb"]),
        ];
        assert_eq!(related_subsystems(&target, &all, 2), vec!["B", "A"]);
    }

    #[test]
    fn target_never_relates_to_itself() {
        let target = sub("Core", &["src/a.rs", "src/b.rs"]);
        let all = vec![target.clone()];
        assert!(related_subsystems(&target, &all, 4).is_empty());
    }

    #[test]
    fn root_files_use_their_name_as_segment() {
        let target = sub("Config", &["Cargo.toml"]);
        let all = vec![sub("Other", &["Cargo.toml.bak", "README.md"])];
        assert!(related_subsystems(&target, &all, 4).is_empty());
    }

    #[test]
    fn deterministic_across_calls() {
        let target = sub("T", &["a/x", "b/y"]);
        let all = vec![sub("P", &["a/1"]), sub("Q", &["b/1", "b/2"]), sub("R", &["c/1"])];
        let first = related_subsystems(&target, &all, 4);
        for _ in 0..5 {
            assert_eq!(related_subsystems(&target, &all, 4), first);
        }
        assert_eq!(first, vec!["Q", "P"]);
    }
}
