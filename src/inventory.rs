//! File inventory: language totals and well-known file lists.
//!
//! Config and documentation files are recognized with `globset` patterns,
//! the same matching the file connectors use for include/exclude lists.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::BTreeMap;

use crate::models::FileRecord;

const CONFIG_GLOBS: &[&str] = &[
    "package.json",
    "tsconfig*.json",
    "jsconfig.json",
    "*.config.js",
    "*.config.cjs",
    "*.config.mjs",
    "*.config.ts",
    "Cargo.toml",
    "go.mod",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "requirements*.txt",
    "Pipfile",
    "Gemfile",
    "composer.json",
    "pom.xml",
    "build.gradle*",
    "settings.gradle*",
    "angular.json",
    "Dockerfile",
    "docker-compose*.yml",
    "docker-compose*.yaml",
    "Makefile",
    ".env.example",
    ".eslintrc*",
    ".prettierrc*",
    ".editorconfig",
    ".github/workflows/*.yml",
    ".github/workflows/*.yaml",
];

const DOC_GLOBS: &[&str] = &[
    "**/*.md",
    "**/*.mdx",
    "**/*.rst",
    "**/*.adoc",
    "docs/**",
    "doc/**",
    "README*",
    "LICENSE*",
    "CHANGELOG*",
    "CONTRIBUTING*",
];

const MAIN_FILE_STEMS: &[&str] = &[
    "main", "index", "app", "server", "lib", "__main__", "manage", "+page", "+layout",
];

/// `*` stops at `/`, so a pattern without `**` only matches at the
/// repository root.
fn build_globset(patterns: &[&str]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).literal_separator(true).build()?);
    }
    Ok(builder.build()?)
}

/// Well-known file lists and language totals for one tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub languages: BTreeMap<String, u64>,
    pub main_files: Vec<String>,
    pub config_files: Vec<String>,
    pub documentation_files: Vec<String>,
}

/// Scans a tree once and fills every [`Inventory`] field. Lists keep tree
/// order.
pub fn take_inventory(tree: &[FileRecord]) -> Result<Inventory> {
    let config_set = build_globset(CONFIG_GLOBS)?;
    let doc_set = build_globset(DOC_GLOBS)?;
    let mut inventory = Inventory::default();

    for file in tree {
        if let Some(language) = file.extension.as_deref().and_then(language_for_extension) {
            *inventory.languages.entry(language.to_string()).or_insert(0) += file.size;
        }

        // Config globs are anchored at the repository root.
        if config_set.is_match(&file.path) {
            inventory.config_files.push(file.path.clone());
        } else if doc_set.is_match(&file.path) {
            inventory.documentation_files.push(file.path.clone());
        } else if is_main_file(file) {
            inventory.main_files.push(file.path.clone());
        }
    }

    Ok(inventory)
}

fn is_main_file(file: &FileRecord) -> bool {
    if file.extension.as_deref().and_then(language_for_extension).is_none() {
        return false;
    }
    let name = file.file_name();
    let stem = name.split('.').next().unwrap_or(name);
    let depth = file.path.matches('/').count();
    // Entry-like names deep inside the tree are usually module indexes.
    depth <= 2 && MAIN_FILE_STEMS.iter().any(|s| s.eq_ignore_ascii_case(stem))
}

/// Programming language for a lowercase file extension.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "rs" => "Rust",
        "ts" | "mts" | "cts" => "TypeScript",
        "tsx" => "TypeScript",
        "js" | "mjs" | "cjs" | "jsx" => "JavaScript",
        "svelte" => "Svelte",
        "vue" => "Vue",
        "py" | "pyi" => "Python",
        "rb" | "erb" => "Ruby",
        "php" => "PHP",
        "java" => "Java",
        "kt" | "kts" => "Kotlin",
        "go" => "Go",
        "c" | "h" => "C",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" => "C++",
        "cs" => "C#",
        "swift" => "Swift",
        "scala" => "Scala",
        "ex" | "exs" => "Elixir",
        "hs" => "Haskell",
        "lua" => "Lua",
        "dart" => "Dart",
        "html" | "htm" => "HTML",
        "css" => "CSS",
        "scss" | "sass" => "SCSS",
        "sh" | "bash" | "zsh" => "Shell",
        "sql" => "SQL",
        _ => return None,
    };
    Some(language)
}
