//! Routing brain: persona selection from workspace context
//!
//! Resolution is a fixed priority list; the first rule that fires wins.
//! Detection only reads the filesystem and is safe to call concurrently.

use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Files or directories that mark a project root
pub const PROJECT_MARKERS: &[&str] = &["PROJECT.BRAIN.md", ".3ox", "brain.rs", "agent_config.json"];

/// Directory name fragments that identify a station root
pub const STATION_ROOTS: &[&str] = &["RVNx.BASE", "SYNTH.BASE", "OBSIDIAN.BASE"];

/// Project marker directory searched for anywhere below the workspace
pub const THREEOX_MARKER: &str = ".3ox";

/// Deepest level below the workspace the pattern scan descends to
pub const MAX_SCAN_DEPTH: usize = 8;

/// Most entries the pattern scan reads before it stops
pub const MAX_SCAN_ENTRIES: usize = 20_000;

/// Agent persona
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Persona {
    #[serde(rename = "@SENTINEL")]
    Sentinel,
    #[serde(rename = "@LIGHTHOUSE")]
    Lighthouse,
    #[serde(rename = "@ALCHEMIST")]
    Alchemist,
    #[serde(rename = "@BRIDGE")]
    Bridge,
    #[serde(rename = "@MASTER")]
    Master,
}

impl Persona {
    pub fn all() -> &'static [Persona] {
        &[
            Self::Sentinel,
            Self::Lighthouse,
            Self::Alchemist,
            Self::Bridge,
            Self::Master,
        ]
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Self::Sentinel => "@SENTINEL",
            Self::Lighthouse => "@LIGHTHOUSE",
            Self::Alchemist => "@ALCHEMIST",
            Self::Bridge => "@BRIDGE",
            Self::Master => "@MASTER",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Persona> {
        Self::all().iter().copied().find(|p| p.tag() == tag)
    }

    /// Descriptive capabilities of this persona
    pub fn capabilities(&self) -> PersonaCapabilities {
        let (description, capabilities, preferred_actions): (&str, [&str; 3], [&str; 3]) =
            match self {
                Self::Sentinel => (
                    "Security monitoring and protection",
                    ["security_audit", "threat_detection", "access_control"],
                    ["audit", "secure-delete", "monitor"],
                ),
                Self::Lighthouse => (
                    "Guidance and navigation",
                    ["summarization", "organization", "guidance"],
                    ["summarize", "organize", "guide"],
                ),
                Self::Alchemist => (
                    "Data transformation and analysis",
                    ["data_processing", "transformation", "analysis"],
                    ["extract", "transform", "analyze"],
                ),
                Self::Bridge => (
                    "Communication and coordination",
                    ["communication", "coordination", "integration"],
                    ["sync", "coordinate", "communicate"],
                ),
                Self::Master => (
                    "General purpose operations",
                    ["general_ops", "coordination", "fallback"],
                    ["organize", "process", "manage"],
                ),
            };
        PersonaCapabilities {
            description: description.to_string(),
            capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
            preferred_actions: preferred_actions.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl std::fmt::Display for Persona {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// What a persona is good at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaCapabilities {
    pub description: String,
    pub capabilities: Vec<String>,
    pub preferred_actions: Vec<String>,
}

/// Capabilities for a persona tag; unknown tags get the general persona
pub fn capabilities(tag: &str) -> PersonaCapabilities {
    Persona::from_tag(tag)
        .unwrap_or(Persona::Master)
        .capabilities()
}

/// Which rule produced a routing decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Project,
    Station,
    ThreeoxProject,
    PatternBased,
    General,
}

impl std::fmt::Display for ContextType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project => write!(f, "project"),
            Self::Station => write!(f, "station"),
            Self::ThreeoxProject => write!(f, "threeox_project"),
            Self::PatternBased => write!(f, "pattern_based"),
            Self::General => write!(f, "general"),
        }
    }
}

/// File pattern classes, in persona priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilePattern {
    SecurityFiles,
    DataFiles,
    Documentation,
}

impl FilePattern {
    pub fn all() -> &'static [FilePattern] {
        &[Self::SecurityFiles, Self::DataFiles, Self::Documentation]
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SecurityFiles => "security_files",
            Self::DataFiles => "data_files",
            Self::Documentation => "documentation",
        }
    }

    pub fn persona(&self) -> Persona {
        match self {
            Self::SecurityFiles => Persona::Sentinel,
            Self::DataFiles => Persona::Alchemist,
            Self::Documentation => Persona::Lighthouse,
        }
    }

    /// Whether a file name belongs to this class
    pub fn matches(&self, file_name: &str) -> bool {
        let name = file_name.to_lowercase();
        match self {
            Self::SecurityFiles => ["security", "auth", "key"].iter().any(|k| name.contains(k)),
            Self::DataFiles => has_extension(&name, &["csv", "json", "xlsx"]),
            Self::Documentation => has_extension(&name, &["md", "rst", "txt"]),
        }
    }

    /// Whether a workspace entry belongs to this class. Security names also
    /// match directories, so an `auth/` folder counts.
    pub fn matches_entry(&self, name: &str, is_file: bool) -> bool {
        (is_file || *self == Self::SecurityFiles) && self.matches(name)
    }
}

fn has_extension(name: &str, extensions: &[&str]) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.contains(&ext))
}

/// Routing decision for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingContext {
    pub workspace: String,
    /// Persona tag; may be a custom `@TAG` declared by a project marker
    pub agent_role: String,
    pub context_type: ContextType,
    /// In `[0, 1]`
    pub confidence: f64,
    pub indicators: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
}

impl RoutingContext {
    fn new(workspace: &Path, role: impl Into<String>, context_type: ContextType, confidence: f64) -> Self {
        Self {
            workspace: workspace.to_string_lossy().into_owned(),
            agent_role: role.into(),
            context_type,
            confidence,
            indicators: Vec::new(),
            station: None,
        }
    }

    fn with_indicator(mut self, indicator: impl Into<String>) -> Self {
        self.indicators.push(indicator.into());
        self
    }
}

/// Stateless persona selector
#[derive(Debug, Clone, Default)]
pub struct RoutingBrain;

impl RoutingBrain {
    pub fn new() -> Self {
        Self
    }

    /// Detect the routing context for a workspace and a job's targets
    pub fn detect_context<S: AsRef<str>>(&self, workspace: &Path, targets: &[S]) -> RoutingContext {
        let workspace = workspace
            .canonicalize()
            .unwrap_or_else(|_| workspace.to_path_buf());

        if let Some(marker) = find_project_marker(&workspace) {
            let role = extract_role(&marker);
            debug!(marker = %marker.display(), role = %role, "Project marker found");
            return RoutingContext::new(&workspace, role, ContextType::Project, 0.9)
                .with_indicator("project_brain");
        }

        if let Some(station) = detect_station(&workspace) {
            let mut context =
                RoutingContext::new(&workspace, Persona::Lighthouse.tag(), ContextType::Station, 0.8)
                    .with_indicator("station_root");
            context.station = Some(station.to_string());
            return context;
        }

        let names = workspace_file_names(&workspace);

        if names.iter().any(|(name, _)| name == THREEOX_MARKER) {
            return RoutingContext::new(
                &workspace,
                Persona::Lighthouse.tag(),
                ContextType::ThreeoxProject,
                0.7,
            )
            .with_indicator("threeox_files");
        }

        let target_names = targets.iter().filter_map(|t| {
            Path::new(t.as_ref())
                .file_name()
                .map(|n| (n.to_string_lossy().into_owned(), true))
        });
        let entries: Vec<(String, bool)> = names.into_iter().chain(target_names).collect();

        let patterns: Vec<FilePattern> = FilePattern::all()
            .iter()
            .copied()
            .filter(|p| entries.iter().any(|(name, is_file)| p.matches_entry(name, *is_file)))
            .collect();

        if let Some(first) = patterns.first() {
            let mut context = RoutingContext::new(
                &workspace,
                first.persona().tag(),
                ContextType::PatternBased,
                0.5,
            );
            context.indicators = patterns.iter().map(|p| p.name().to_string()).collect();
            return context;
        }

        RoutingContext::new(&workspace, Persona::Master.tag(), ContextType::General, 0.0)
    }
}

/// Search the workspace and its ancestors (excluding the filesystem root)
fn find_project_marker(workspace: &Path) -> Option<PathBuf> {
    workspace
        .ancestors()
        .filter(|dir| dir.parent().is_some())
        .find_map(|dir| {
            PROJECT_MARKERS
                .iter()
                .map(|marker| dir.join(marker))
                .find(|candidate| candidate.exists())
        })
}

/// Declared persona in a marker file: a known tag anywhere, else a `role: @TAG` line
fn extract_role(marker: &Path) -> String {
    let Ok(content) = std::fs::read_to_string(marker) else {
        return Persona::Master.tag().to_string();
    };

    if let Some(persona) = Persona::all().iter().find(|p| content.contains(p.tag())) {
        return persona.tag().to_string();
    }

    content
        .lines()
        .filter(|line| line.to_lowercase().contains("role:"))
        .filter_map(|line| line.split(':').nth(1))
        .map(str::trim)
        .find(|role| role.starts_with('@'))
        .map(str::to_string)
        .unwrap_or_else(|| Persona::Master.tag().to_string())
}

fn detect_station(workspace: &Path) -> Option<&'static str> {
    let name = workspace.file_name()?.to_string_lossy();
    STATION_ROOTS.iter().copied().find(|s| name.contains(s))
}

/// Entry names below the workspace, with whether each is a regular file.
///
/// The scan stops at [`MAX_SCAN_DEPTH`] and [`MAX_SCAN_ENTRIES`].
fn workspace_file_names(workspace: &Path) -> Vec<(String, bool)> {
    if !workspace.is_dir() {
        return Vec::new();
    }
    WalkBuilder::new(workspace)
        .hidden(false)
        .ignore(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .max_depth(Some(MAX_SCAN_DEPTH))
        .build()
        .flatten()
        .filter(|entry| entry.depth() > 0)
        .take(MAX_SCAN_ENTRIES)
        .map(|entry| {
            let is_file = entry.file_type().is_some_and(|t| t.is_file());
            (entry.file_name().to_string_lossy().into_owned(), is_file)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const NO_TARGETS: [&str; 0] = [];

    #[test]
    fn test_project_marker_with_declared_role() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("PROJECT.BRAIN.md"), "# Brain\nrole: @SENTINEL\n").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@SENTINEL");
        assert_eq!(ctx.context_type, ContextType::Project);
        assert_eq!(ctx.confidence, 0.9);
    }

    #[test]
    fn test_project_marker_custom_role_line() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("agent_config.json"), "role: @SCOUT\n").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@SCOUT");
    }

    #[test]
    fn test_project_marker_in_ancestor() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("brain.rs"), "// no role here").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let ctx = RoutingBrain::new().detect_context(&nested, &NO_TARGETS);
        assert_eq!(ctx.context_type, ContextType::Project);
        assert_eq!(ctx.agent_role, "@MASTER");
    }

    #[test]
    fn test_station_root() {
        let dir = tempdir().unwrap();
        let station = dir.path().join("my.SYNTH.BASE");
        fs::create_dir(&station).unwrap();

        let ctx = RoutingBrain::new().detect_context(&station, &NO_TARGETS);
        assert_eq!(ctx.context_type, ContextType::Station);
        assert_eq!(ctx.agent_role, "@LIGHTHOUSE");
        assert_eq!(ctx.confidence, 0.8);
        assert_eq!(ctx.station.as_deref(), Some("SYNTH.BASE"));
    }

    #[test]
    fn test_nested_threeox_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub").join(".3ox")).unwrap();
        fs::write(dir.path().join("sub").join("data.csv"), "a,b").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.context_type, ContextType::ThreeoxProject);
        assert_eq!(ctx.confidence, 0.7);
    }

    #[test]
    fn test_pattern_priority_security_over_data() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("report.csv"), "").unwrap();
        fs::write(dir.path().join("notes.md"), "").unwrap();
        fs::write(dir.path().join("auth_settings.yaml"), "").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@SENTINEL");
        assert_eq!(ctx.context_type, ContextType::PatternBased);
        assert_eq!(ctx.confidence, 0.5);
        assert_eq!(
            ctx.indicators,
            vec!["security_files", "data_files", "documentation"]
        );
    }

    #[test]
    fn test_security_directory_name_matches() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("auth")).unwrap();
        fs::write(dir.path().join("auth").join("readme.md"), "").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@SENTINEL");
        assert_eq!(ctx.indicators, vec!["security_files", "documentation"]);
    }

    #[test]
    fn test_extension_classes_ignore_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("exports.csv")).unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@MASTER");
    }

    #[test]
    fn test_scan_stops_at_max_depth() {
        let dir = tempdir().unwrap();
        let mut deep = dir.path().to_path_buf();
        for level in 0..MAX_SCAN_DEPTH {
            deep.push(format!("level{}", level));
        }
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("api_key.txt"), "").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@MASTER");

        fs::write(deep.parent().unwrap().join("api_key.txt"), "").unwrap();
        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@SENTINEL");
    }

    #[test]
    fn test_pattern_from_targets() {
        let dir = tempdir().unwrap();
        let ctx = RoutingBrain::new().detect_context(dir.path(), &["/elsewhere/sales.xlsx"]);
        assert_eq!(ctx.agent_role, "@ALCHEMIST");
    }

    #[test]
    fn test_fallback() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("image.png"), "").unwrap();

        let ctx = RoutingBrain::new().detect_context(dir.path(), &NO_TARGETS);
        assert_eq!(ctx.agent_role, "@MASTER");
        assert_eq!(ctx.context_type, ContextType::General);
        assert_eq!(ctx.confidence, 0.0);
        assert!(ctx.indicators.is_empty());
    }

    #[test]
    fn test_capabilities_fallback() {
        assert_eq!(capabilities("@ALCHEMIST").description, "Data transformation and analysis");
        assert_eq!(capabilities("@UNKNOWN"), Persona::Master.capabilities());
        assert!(capabilities("@SENTINEL")
            .preferred_actions
            .contains(&"audit".to_string()));
    }
}
