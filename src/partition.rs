//! Subsystem partitioning.
//!
//! Files are grouped by an ordered list of path rules: framework-specific
//! rules first, then rules common to every project. The first rule that
//! matches a file claims it, and files no rule matches land in `Other`.
//! Because every file is claimed exactly once the output is a partition of
//! the tree, never a cover.
//!
//! The same rule tables drive [`role_for_name`], which the graph builder
//! uses to tag subsystems by architectural role.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::classify::Framework;
use crate::models::{FileRecord, Subsystem};

/// Name of the subsystem that absorbs unmatched files.
pub const OTHER: &str = "Other";

const OTHER_DESCRIPTION: &str = "Files that do not fit a recognized structural role";

/// Architectural role of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Entry,
    Ui,
    Service,
    Other,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Ui => "ui",
            Self::Service => "service",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One partitioning rule.
///
/// `dirs` entries match a contiguous run of directory segments anywhere in
/// the path (`"app/controllers"` matches `app/controllers/x.rb` and
/// `engine/app/controllers/y.rb`); `files` entries match the file name.
/// Matching is ASCII case-insensitive.
#[derive(Debug)]
pub struct Rule {
    pub name: &'static str,
    pub role: Role,
    pub dirs: &'static [&'static str],
    pub files: &'static [&'static str],
    pub description: &'static str,
}

impl Rule {
    fn matches(&self, dir_segments: &[&str], file_name: &str) -> bool {
        if self
            .files
            .iter()
            .any(|f| f.eq_ignore_ascii_case(file_name))
        {
            return true;
        }
        self.dirs.iter().any(|pattern| {
            let wanted: Vec<&str> = pattern.split('/').collect();
            dir_segments.windows(wanted.len()).any(|window| {
                window
                    .iter()
                    .zip(wanted.iter())
                    .all(|(have, want)| have.eq_ignore_ascii_case(want))
            })
        })
    }
}

const fn rule(
    name: &'static str,
    role: Role,
    dirs: &'static [&'static str],
    files: &'static [&'static str],
    description: &'static str,
) -> Rule {
    Rule {
        name,
        role,
        dirs,
        files,
        description,
    }
}

static TESTS: Rule = rule(
    "Tests",
    Role::Other,
    &["tests", "test", "__tests__", "spec", "specs", "e2e", "testing"],
    &[],
    "Automated tests and test fixtures",
);

static COMMON: &[Rule] = &[
    rule("Routes", Role::Entry, &["routes", "router"], &[], "Route definitions and request entry points"),
    rule("Pages", Role::Entry, &["pages"], &[], "Page-level entry points"),
    rule("Components", Role::Ui, &["components"], &[], "Reusable user interface components"),
    rule("Views", Role::Ui, &["views", "layouts", "templates", "screens"], &[], "Views, layouts and templates"),
    rule("Services", Role::Service, &["services", "service", "api"], &[], "Business logic and external API access"),
    rule("Stores", Role::Service, &["stores", "store", "state", "redux"], &[], "Application state management"),
    rule("Models", Role::Service, &["models", "entities", "schemas", "db", "database"], &[], "Data models and persistence"),
    rule("Utils", Role::Other, &["utils", "util", "helpers", "helper"], &[], "Shared helper functions"),
    rule("Styles", Role::Ui, &["styles", "css", "scss", "sass"], &[], "Stylesheets and theming"),
    rule("Assets", Role::Other, &["static", "public", "assets", "images", "img", "fonts"], &[], "Static assets"),
    rule("Scripts", Role::Other, &["scripts", "tools"], &[], "Build and maintenance scripts"),
    rule("Config", Role::Other, &["config", "configs", ".github", ".circleci"], &[], "Configuration and CI settings"),
    rule("Docs", Role::Other, &["docs", "doc", "documentation"], &[], "Project documentation"),
    rule("Library", Role::Service, &["lib", "src/lib"], &[], "Shared library code"),
];

static SVELTE: &[Rule] = &[
    rule("Routes", Role::Entry, &["routes"], &[], "SvelteKit routes, pages and endpoints"),
    rule("Components", Role::Ui, &["components"], &[], "Svelte UI components"),
    rule("Stores", Role::Service, &["stores"], &[], "Svelte stores holding shared state"),
    rule("Services", Role::Service, &["services", "api", "lib/server", "server"], &[], "Server-side logic and API clients"),
];

static NEXTJS: &[Rule] = &[
    rule("Api", Role::Service, &["pages/api", "app/api"], &[], "Next.js API route handlers"),
    rule("Pages", Role::Entry, &["pages", "app"], &[], "Next.js pages and app-router segments"),
    rule("Components", Role::Ui, &["components"], &[], "React components"),
    rule("Hooks", Role::Service, &["hooks"], &[], "Custom React hooks"),
];

static NUXT: &[Rule] = &[
    rule("Pages", Role::Entry, &["pages"], &[], "Nuxt pages"),
    rule("Layouts", Role::Ui, &["layouts"], &[], "Nuxt layouts"),
    rule("Components", Role::Ui, &["components"], &[], "Vue components"),
    rule("Composables", Role::Service, &["composables"], &[], "Vue composables"),
    rule("Server", Role::Service, &["server"], &[], "Nitro server routes and middleware"),
];

static FRONTEND: &[Rule] = &[
    rule("Pages", Role::Entry, &["pages", "routes", "router"], &[], "Routing and page-level entry points"),
    rule("Components", Role::Ui, &["components", "views", "screens"], &[], "User interface components"),
    rule("Hooks", Role::Service, &["hooks", "composables"], &[], "Reusable stateful logic"),
    rule("Services", Role::Service, &["services", "api"], &[], "API clients and business logic"),
];

static ANGULAR: &[Rule] = &[
    rule("Components", Role::Ui, &["components", "pages"], &[], "Angular components"),
    rule("Services", Role::Service, &["services", "core"], &[], "Angular injectable services"),
    rule("Modules", Role::Entry, &["app"], &["main.ts"], "Angular modules and bootstrap"),
];

static EXPRESS: &[Rule] = &[
    rule("Routes", Role::Entry, &["routes"], &[], "Express route definitions"),
    rule("Controllers", Role::Entry, &["controllers"], &[], "Request handlers"),
    rule("Middleware", Role::Service, &["middleware", "middlewares"], &[], "Express middleware"),
    rule("Models", Role::Service, &["models"], &[], "Data models"),
];

static DJANGO: &[Rule] = &[
    rule("Migrations", Role::Other, &["migrations"], &[], "Database schema migrations"),
    rule("Routes", Role::Entry, &[], &["urls.py"], "URL configuration"),
    rule("Views", Role::Entry, &["views"], &["views.py"], "Django views"),
    rule("Templates", Role::Ui, &["templates"], &[], "Django templates"),
    rule("Models", Role::Service, &["models"], &["models.py", "serializers.py"], "Django models and serializers"),
];

static RAILS: &[Rule] = &[
    rule("Controllers", Role::Entry, &["app/controllers"], &["routes.rb"], "Rails controllers and routes"),
    rule("Views", Role::Ui, &["app/views", "app/helpers"], &[], "Rails views and helpers"),
    rule("Models", Role::Service, &["app/models"], &[], "ActiveRecord models"),
    rule("Migrations", Role::Other, &["db/migrate"], &[], "Database schema migrations"),
];

static LARAVEL: &[Rule] = &[
    rule("Routes", Role::Entry, &["routes"], &[], "Laravel route files"),
    rule("Controllers", Role::Entry, &["app/http/controllers"], &[], "HTTP controllers"),
    rule("Views", Role::Ui, &["resources/views"], &[], "Blade templates"),
    rule("Models", Role::Service, &["app/models"], &[], "Eloquent models"),
];

static SPRING: &[Rule] = &[
    rule("Controllers", Role::Entry, &["controller", "controllers", "web"], &[], "Spring MVC controllers"),
    rule("Services", Role::Service, &["service", "services"], &[], "Service layer"),
    rule("Repositories", Role::Service, &["repository", "repositories"], &[], "Spring Data repositories"),
    rule("Models", Role::Service, &["model", "entity", "domain", "dto"], &[], "Domain entities and DTOs"),
];

static RUST: &[Rule] = &[
    rule("Binaries", Role::Entry, &["src/bin"], &["main.rs"], "Binary entry points"),
    rule("Benches", Role::Other, &["benches"], &[], "Benchmarks"),
    rule("Crates", Role::Service, &["crates"], &[], "Workspace member crates"),
];

static GO: &[Rule] = &[
    rule("Commands", Role::Entry, &["cmd"], &["main.go"], "Command entry points"),
    rule("Internal", Role::Service, &["internal"], &[], "Internal packages"),
    rule("Packages", Role::Service, &["pkg"], &[], "Public packages"),
];

static PYTHON: &[Rule] = &[
    rule("Entry Points", Role::Entry, &[], &["__main__.py", "cli.py", "main.py", "app.py"], "Command-line and application entry points"),
];

fn framework_rules(framework: Framework) -> &'static [Rule] {
    match framework {
        Framework::Svelte => SVELTE,
        Framework::NextJs => NEXTJS,
        Framework::Nuxt => NUXT,
        Framework::Angular => ANGULAR,
        Framework::Vue | Framework::React => FRONTEND,
        Framework::Express | Framework::Node => EXPRESS,
        Framework::Django => DJANGO,
        Framework::Python => PYTHON,
        Framework::Rails => RAILS,
        Framework::Laravel => LARAVEL,
        Framework::Spring => SPRING,
        Framework::Rust => RUST,
        Framework::Go => GO,
        Framework::Unknown => &[],
    }
}

/// The ordered rule list for a framework: tests, framework rules, then
/// common rules whose names the framework did not already claim.
pub fn rules_for(framework: Framework) -> Vec<&'static Rule> {
    let mut seen = HashSet::new();
    std::iter::once(&TESTS)
        .chain(framework_rules(framework).iter())
        .chain(COMMON.iter())
        .filter(|r| seen.insert(r.name))
        .collect()
}

/// Partitions a file tree into named subsystems.
///
/// Deterministic: subsystems come out in rule order with `Other` last, and
/// files keep tree order. Empty subsystems are omitted. A path repeated in
/// the tree is assigned once.
pub fn partition(tree: &[FileRecord], framework: Framework) -> Vec<Subsystem> {
    let rules = rules_for(framework);
    let mut buckets: Vec<Vec<String>> = vec![Vec::new(); rules.len()];
    let mut other = Vec::new();
    let mut seen = HashSet::new();

    for file in tree {
        if !seen.insert(file.path.as_str()) {
            continue;
        }
        let (dir_segments, file_name) = split_path(&file.path);
        match rules
            .iter()
            .position(|r| r.matches(&dir_segments, file_name))
        {
            Some(idx) => buckets[idx].push(file.path.clone()),
            None => other.push(file.path.clone()),
        }
    }

    let mut subsystems: Vec<Subsystem> = rules
        .iter()
        .zip(buckets)
        .filter(|(_, files)| !files.is_empty())
        .map(|(rule, files)| Subsystem {
            name: rule.name.to_string(),
            files,
            description: rule.description.to_string(),
        })
        .collect();

    if !other.is_empty() {
        subsystems.push(Subsystem {
            name: OTHER.to_string(),
            files: other,
            description: OTHER_DESCRIPTION.to_string(),
        });
    }

    subsystems
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    match path.rsplit_once('/') {
        Some((dir, name)) => (dir.split('/').filter(|s| !s.is_empty()).collect(), name),
        None => (Vec::new(), path),
    }
}

const ENTRY_KEYWORDS: &[&str] = &[
    "route", "page", "controller", "command", "cmd", "entry", "binar", "main", "url", "endpoint",
];
const UI_KEYWORDS: &[&str] = &[
    "component", "view", "template", "layout", "ui", "screen", "style", "widget", "frontend",
];
const SERVICE_KEYWORDS: &[&str] = &[
    "service", "api", "store", "state", "model", "composable", "hook", "middleware", "repositor",
    "server", "backend", "internal", "package", "crate", "librar", "data",
];

/// Role of a subsystem by its declared name.
///
/// Names produced by `framework`'s rule list resolve to that rule's role, so
/// the graph agrees with the partition; any other name is matched by
/// keyword, checking entry, UI, then service keywords.
pub fn role_for_name(name: &str, framework: Framework) -> Role {
    if name == OTHER {
        return Role::Other;
    }
    if let Some(rule) = rules_for(framework)
        .into_iter()
        .find(|r| r.name.eq_ignore_ascii_case(name))
    {
        return rule.role;
    }

    let lower = name.to_ascii_lowercase();
    let has_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));
    if has_any(ENTRY_KEYWORDS) {
        Role::Entry
    } else if has_any(UI_KEYWORDS) {
        Role::Ui
    } else if has_any(SERVICE_KEYWORDS) {
        Role::Service
    } else {
        Role::Other
    }
}
