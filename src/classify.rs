//! Framework classification from file-tree signatures.
//!
//! [`classify`] looks only at paths: manifest files, framework config files,
//! and characteristic directories. It never reads file contents, so it is a
//! pure function of the tree.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::models::FileRecord;

/// The closed set of framework labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Svelte,
    NextJs,
    Nuxt,
    Angular,
    Vue,
    React,
    Express,
    Node,
    Django,
    Python,
    Rails,
    Laravel,
    Spring,
    Rust,
    Go,
    Unknown,
}

impl Framework {
    pub const ALL: [Framework; 16] = [
        Framework::Svelte,
        Framework::NextJs,
        Framework::Nuxt,
        Framework::Angular,
        Framework::Vue,
        Framework::React,
        Framework::Express,
        Framework::Node,
        Framework::Django,
        Framework::Python,
        Framework::Rails,
        Framework::Laravel,
        Framework::Spring,
        Framework::Rust,
        Framework::Go,
        Framework::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Svelte => "svelte",
            Self::NextJs => "nextjs",
            Self::Nuxt => "nuxt",
            Self::Angular => "angular",
            Self::Vue => "vue",
            Self::React => "react",
            Self::Express => "express",
            Self::Node => "node",
            Self::Django => "django",
            Self::Python => "python",
            Self::Rails => "rails",
            Self::Laravel => "laravel",
            Self::Spring => "spring",
            Self::Rust => "rust",
            Self::Go => "go",
            Self::Unknown => "unknown",
        }
    }

    /// Human-readable name used in prompts and CLI output.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Svelte => "Svelte / SvelteKit",
            Self::NextJs => "Next.js",
            Self::Nuxt => "Nuxt",
            Self::Angular => "Angular",
            Self::Vue => "Vue",
            Self::React => "React",
            Self::Express => "Express",
            Self::Node => "Node.js",
            Self::Django => "Django",
            Self::Python => "Python",
            Self::Rails => "Ruby on Rails",
            Self::Laravel => "Laravel",
            Self::Spring => "Spring",
            Self::Rust => "Rust",
            Self::Go => "Go",
            Self::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Framework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framework {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Framework::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown framework: {}", s))
    }
}

/// Paths and names extracted once from the tree.
struct Signatures<'a> {
    root_files: HashSet<&'a str>,
    dirs: HashSet<&'a str>,
    file_names: HashSet<&'a str>,
    extensions: HashSet<&'a str>,
}

impl<'a> Signatures<'a> {
    fn new(tree: &'a [FileRecord]) -> Self {
        let mut sig = Signatures {
            root_files: HashSet::new(),
            dirs: HashSet::new(),
            file_names: HashSet::new(),
            extensions: HashSet::new(),
        };
        for file in tree {
            let path = file.path.as_str();
            match path.rsplit_once('/') {
                Some((dir, name)) => {
                    sig.file_names.insert(name);
                    for (idx, _) in dir.match_indices('/') {
                        sig.dirs.insert(&dir[..idx]);
                    }
                    sig.dirs.insert(dir);
                }
                None => {
                    sig.root_files.insert(path);
                    sig.file_names.insert(path);
                }
            }
            if let Some(ext) = file.extension.as_deref() {
                sig.extensions.insert(ext);
            }
        }
        sig
    }

    fn root_starts_with(&self, prefix: &str) -> bool {
        self.root_files.iter().any(|f| f.starts_with(prefix))
    }

    fn has_root(&self, name: &str) -> bool {
        self.root_files.contains(name)
    }

    fn has_dir(&self, dir: &str) -> bool {
        self.dirs.contains(dir)
    }

    fn has_dir_named(&self, name: &str) -> bool {
        self.dirs
            .iter()
            .any(|d| d.rsplit('/').next() == Some(name))
    }

    fn has_file_named(&self, name: &str) -> bool {
        self.file_names.contains(name)
    }

    fn has_ext(&self, ext: &str) -> bool {
        self.extensions.contains(ext)
    }
}

/// Assigns exactly one framework label to a file tree.
///
/// Signatures are checked from most to least specific; the first match
/// wins, and a tree with no recognizable signature is [`Framework::Unknown`].
pub fn classify(tree: &[FileRecord]) -> Framework {
    let sig = Signatures::new(tree);
    let has_package_json = sig.has_root("package.json");

    if sig.root_starts_with("svelte.config.") || (has_package_json && sig.has_ext("svelte")) {
        return Framework::Svelte;
    }
    if sig.root_starts_with("next.config.") {
        return Framework::NextJs;
    }
    if sig.root_starts_with("nuxt.config.") {
        return Framework::Nuxt;
    }
    if sig.has_root("angular.json") {
        return Framework::Angular;
    }
    if sig.root_starts_with("vue.config.") || (has_package_json && sig.has_ext("vue")) {
        return Framework::Vue;
    }
    if has_package_json && (sig.has_ext("jsx") || sig.has_ext("tsx")) {
        return Framework::React;
    }
    if has_package_json
        && (sig.has_dir("routes")
            || sig.has_dir("src/routes")
            || sig.has_dir("middleware")
            || sig.has_root("server.js")
            || sig.has_root("app.js")
            || sig.has_root("server.ts"))
    {
        return Framework::Express;
    }
    if has_package_json {
        return Framework::Node;
    }
    if sig.has_root("manage.py") {
        return Framework::Django;
    }
    if sig.has_root("Gemfile") && sig.has_dir("config") && sig.has_dir("app") {
        return Framework::Rails;
    }
    if sig.has_root("artisan") && sig.has_root("composer.json") {
        return Framework::Laravel;
    }
    if (sig.has_root("pom.xml") || sig.root_starts_with("build.gradle"))
        && sig.has_dir("src/main/java")
    {
        return Framework::Spring;
    }
    if sig.has_root("Cargo.toml") {
        return Framework::Rust;
    }
    if sig.has_root("go.mod") {
        return Framework::Go;
    }
    if sig.has_root("pyproject.toml")
        || sig.has_root("setup.py")
        || sig.has_root("requirements.txt")
        || (sig.has_ext("py") && sig.has_file_named("__init__.py"))
        || sig.has_dir_named("site-packages")
    {
        return Framework::Python;
    }

    Framework::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(paths: &[&str]) -> Vec<FileRecord> {
        paths.iter().map(|p| FileRecord::new(*p, 10)).collect()
    }

    #[test]
    fn svelte_by_config_file() {
        let t = tree(&["svelte.config.js", "package.json", "src/routes/+page.svelte"]);
        assert_eq!(classify(&t), Framework::Svelte);
    }

    #[test]
    fn next_beats_react() {
        let t = tree(&["package.json", "next.config.mjs", "pages/index.tsx"]);
        assert_eq!(classify(&t), Framework::NextJs);
    }

    #[test]
    fn react_by_jsx_files() {
        let t = tree(&["package.json", "src/App.jsx", "src/index.js"]);
        assert_eq!(classify(&t), Framework::React);
    }

    #[test]
    fn express_by_routes_dir() {
        let t = tree(&["package.json", "routes/users.js", "index.js"]);
        assert_eq!(classify(&t), Framework::Express);
    }

    #[test]
    fn plain_node() {
        let t = tree(&["package.json", "lib/index.js"]);
        assert_eq!(classify(&t), Framework::Node);
    }

    #[test]
    fn backend_frameworks() {
        assert_eq!(
            classify(&tree(&["manage.py", "blog/models.py"])),
            Framework::Django
        );
        assert_eq!(
            classify(&tree(&["Gemfile", "config/routes.rb", "app/models/user.rb"])),
            Framework::Rails
        );
        assert_eq!(
            classify(&tree(&["artisan", "composer.json", "app/Http/Kernel.php"])),
            Framework::Laravel
        );
        assert_eq!(
            classify(&tree(&["pom.xml", "src/main/java/App.java"])),
            Framework::Spring
        );
        assert_eq!(classify(&tree(&["Cargo.toml", "src/lib.rs"])), Framework::Rust);
        assert_eq!(classify(&tree(&["go.mod", "cmd/app/main.go"])), Framework::Go);
        assert_eq!(
            classify(&tree(&["pyproject.toml", "pkg/__init__.py"])),
            Framework::Python
        );
    }

    #[test]
    fn nested_manifest_is_not_a_root_signature() {
        let t = tree(&["docs/Cargo.toml", "README.md"]);
        assert_eq!(classify(&t), Framework::Unknown);
    }

    #[test]
    fn empty_tree_is_unknown() {
        assert_eq!(classify(&[]), Framework::Unknown);
    }

    #[test]
    fn labels_round_trip_through_strings() {
        for framework in Framework::ALL {
            assert_eq!(framework.as_str().parse::<Framework>().unwrap(), framework);
        }
    }
}
