//! Specialist definition: a named capability plus the opaque instructions
//! forwarded to the agent executor.
//!
//! Definitions come from the built-in set below or from files:
//!
//! ```yaml
//! id: "graphql-expert"
//! name: "GraphQL Expert"
//! description: "Designs GraphQL schemas and resolvers"
//! keywords: ["graphql", "resolver", "schema"]
//! role: producer
//! precedence: 10
//! focus: "schema types, resolvers, pagination"
//! instructions: |
//!   You are a GraphQL expert...
//! ```
//!
//! Markdown files carry the same keys in YAML frontmatter; the body becomes
//! the instructions and the id is taken from the file stem. A Markdown file
//! without frontmatter is accepted as plain instructions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// How a specialist participates in cross-specialist integration checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationRole {
    /// Defines contracts (APIs, schemas) that others integrate against.
    Producer,
    /// Integrates against contracts defined by producers.
    Consumer,
    #[default]
    Independent,
}

impl IntegrationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Consumer => "consumer",
            Self::Independent => "independent",
        }
    }
}

/// Where a definition came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", content = "path", rename_all = "lowercase")]
pub enum SpecialistSource {
    #[default]
    Builtin,
    File(PathBuf),
}

impl std::fmt::Display for SpecialistSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Builtin => f.write_str("builtin"),
            Self::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A member of a composite category, e.g. `full-stack` → `backend`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeMember {
    pub specialist: String,
    #[serde(default)]
    pub focus: Option<String>,
}

/// A specialist definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialistDef {
    /// Specialist ID (e.g., "backend", "frontend")
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Behavioral instructions, forwarded verbatim and never interpreted.
    #[serde(default, alias = "system_prompt")]
    pub instructions: String,

    /// Classification keywords, matched against the task text.
    #[serde(default)]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub role: IntegrationRole,

    /// Production order; lower runs in an earlier stage.
    #[serde(default = "default_precedence")]
    pub precedence: u32,

    /// Focus appended to the instruction when the splitter has none.
    #[serde(default)]
    pub focus: Option<String>,

    /// Pipeline roles (splitter, prompt engineer, composer) are never routed user work.
    #[serde(default)]
    pub internal: bool,

    /// Non-empty for composite categories, which expand instead of dispatching.
    #[serde(default)]
    pub members: Vec<CompositeMember>,

    #[serde(default)]
    pub metadata: HashMap<String, String>,

    #[serde(skip)]
    pub source: SpecialistSource,
}

pub const DEFAULT_PRECEDENCE: u32 = 20;

fn default_precedence() -> u32 {
    DEFAULT_PRECEDENCE
}

impl SpecialistDef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            instructions: String::new(),
            keywords: Vec::new(),
            role: IntegrationRole::Independent,
            precedence: DEFAULT_PRECEDENCE,
            focus: None,
            internal: false,
            members: Vec::new(),
            metadata: HashMap::new(),
            source: SpecialistSource::Builtin,
        }
    }

    pub fn is_composite(&self) -> bool {
        !self.members.is_empty()
    }

    /// Whether the splitter may route user work here.
    pub fn is_routable(&self) -> bool {
        !self.internal && !self.is_composite()
    }

    pub fn description_or_name(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    /// Parse a specialist definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let def: Self = serde_yaml::from_str(yaml)
            .map_err(|e| format!("Failed to parse specialist YAML: {}", e))?;
        def.check()?;
        Ok(def)
    }

    /// Load a specialist definition from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read specialist file '{}': {}", path.display(), e))?;
        let mut def = Self::from_yaml(&content)?;
        def.source = SpecialistSource::File(path.to_path_buf());
        Ok(def)
    }

    /// Parse a specialist from a Markdown file, with or without YAML frontmatter.
    pub fn from_markdown(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read specialist markdown '{}': {}", path.display(), e))?;

        // Derive ID from filename
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| format!("Invalid specialist file name '{}'", path.display()))?;

        #[derive(Deserialize, Default)]
        struct FrontMatter {
            name: Option<String>,
            description: Option<String>,
            #[serde(default)]
            keywords: Vec<String>,
            #[serde(default)]
            role: IntegrationRole,
            precedence: Option<u32>,
            focus: Option<String>,
            #[serde(default)]
            members: Vec<CompositeMember>,
            #[serde(default)]
            metadata: HashMap<String, String>,
        }

        let (fm, body) = match split_frontmatter(&content) {
            Some((frontmatter, body)) => {
                let fm: FrontMatter = serde_yaml::from_str(frontmatter).map_err(|e| {
                    format!("Failed to parse frontmatter in '{}': {}", path.display(), e)
                })?;
                (fm, body)
            }
            None => (FrontMatter::default(), content.trim()),
        };

        let def = Self {
            name: fm.name.unwrap_or_else(|| id.clone()),
            id,
            description: fm.description,
            instructions: body.to_string(),
            keywords: fm.keywords,
            role: fm.role,
            precedence: fm.precedence.unwrap_or(DEFAULT_PRECEDENCE),
            focus: fm.focus,
            internal: false,
            members: fm.members,
            metadata: fm.metadata,
            source: SpecialistSource::File(path.to_path_buf()),
        };
        def.check().map_err(|e| format!("{} ('{}')", e, path.display()))?;
        Ok(def)
    }

    fn check(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("Specialist id must not be empty".to_string());
        }
        if self.instructions.trim().is_empty() && !self.is_composite() {
            return Err(format!("Specialist '{}' has no instructions", self.id));
        }
        Ok(())
    }
}

/// Split `---\nyaml\n---\nbody`. Returns `None` when there is no frontmatter.
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let trimmed = content.trim_start();
    if !trimmed.starts_with("---") {
        return None;
    }
    let parts: Vec<&str> = trimmed.splitn(3, "---").collect();
    if parts.len() < 3 {
        return None;
    }
    Some((parts[1].trim(), parts[2].trim()))
}

fn builtin(
    id: &str,
    name: &str,
    description: &str,
    role: IntegrationRole,
    precedence: u32,
    keywords: &[&str],
    focus: &str,
    instructions: &str,
) -> SpecialistDef {
    SpecialistDef {
        description: Some(description.to_string()),
        instructions: instructions.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        role,
        precedence,
        focus: Some(focus.to_string()),
        ..SpecialistDef::new(id, name)
    }
}

fn internal(id: &str, name: &str, description: &str, instructions: &str) -> SpecialistDef {
    SpecialistDef {
        description: Some(description.to_string()),
        instructions: instructions.to_string(),
        internal: true,
        ..SpecialistDef::new(id, name)
    }
}

pub const GENERAL_SPECIALIST: &str = "general";
pub const SPLITTER_SPECIALIST: &str = "splitter";
pub const PROMPT_ENGINEER_SPECIALIST: &str = "prompt-engineer";
pub const COMPOSER_SPECIALIST: &str = "composer";
pub const FULL_STACK_CATEGORY: &str = "full-stack";

/// Built-in specialists (hardcoded, no files needed).
pub fn builtin_specialists() -> Vec<SpecialistDef> {
    use IntegrationRole::*;

    let mut defs = vec![
        builtin(
            "backend",
            "Backend Architect",
            "Designs APIs, services, data models and authentication",
            Producer,
            10,
            &[
                "backend", "api", "endpoint", "server", "database", "schema", "authentication",
                "auth", "rest", "graphql", "microservice", "service", "jwt", "session", "sql",
            ],
            "API endpoint definitions, database schema, service architecture",
            "You are a backend architect. Design and implement the server side: API endpoints \
             with explicit request and response shapes, data models and persistence, \
             authentication and authorization. List every endpoint as `METHOD /path` and every \
             payload as JSON with concrete field names.",
        ),
        builtin(
            "frontend",
            "Frontend Developer",
            "Builds UI components, pages, styling and client-side state",
            Consumer,
            20,
            &[
                "frontend", "ui", "page", "component", "form", "react", "vue", "svelte", "css",
                "html", "button", "layout", "dashboard", "screen", "view", "client",
            ],
            "components, styling, state management, frontend integration with backend API",
            "You are a frontend developer. Build the user-facing side: components, pages, \
             styling and state management. When calling a backend, reference each endpoint as \
             `METHOD /path` and use exactly the JSON field names the backend defines.",
        ),
        builtin(
            "cloud",
            "Cloud Architect",
            "Designs cloud infrastructure, networking and cost-aware deployments",
            Independent,
            10,
            &["cloud", "aws", "gcp", "azure", "terraform", "infrastructure", "kubernetes", "serverless", "vpc"],
            "infrastructure as code, networking, scaling and cost",
            "You are a cloud architect. Design infrastructure as code, networking, scaling \
             and cost controls for the requested system.",
        ),
        builtin(
            "ui-ux-designer",
            "UI/UX Designer",
            "Designs user flows, wireframes and accessible interfaces",
            Independent,
            5,
            &["design", "ux", "wireframe", "usability", "accessibility", "figma", "prototype", "mockup"],
            "user flows, wireframes, accessibility",
            "You are a UI/UX designer. Produce user flows, wireframes and accessibility \
             guidance the frontend can implement directly.",
        ),
        builtin(
            "python-pro",
            "Python Pro",
            "Writes idiomatic, typed and tested Python",
            Independent,
            10,
            &["python", "django", "flask", "fastapi", "pytest", "pandas", "asyncio"],
            "idiomatic Python, typing, tests",
            "You are a Python expert. Write idiomatic, typed Python with tests.",
        ),
        builtin(
            "data-engineer",
            "Data Engineer",
            "Builds data pipelines, ETL jobs and warehouses",
            Producer,
            10,
            &["etl", "pipeline", "warehouse", "spark", "kafka", "airflow", "dbt", "ingestion"],
            "pipeline stages, data contracts, scheduling",
            "You are a data engineer. Build reliable data pipelines with explicit data \
             contracts between stages.",
        ),
        builtin(
            "ai-engineer",
            "AI Engineer",
            "Builds LLM applications, RAG systems and model integrations",
            Independent,
            10,
            &["llm", "rag", "embedding", "embeddings", "ml", "model", "prompt", "openai", "agent", "vector"],
            "model integration, retrieval, evaluation",
            "You are an AI engineer. Build LLM features with retrieval, evaluation and \
             sensible fallbacks.",
        ),
        builtin(
            "deployment-engineer",
            "Deployment Engineer",
            "Sets up CI/CD, containers and release automation",
            Independent,
            30,
            &["deploy", "deployment", "ci", "cd", "docker", "container", "helm", "release", "github actions"],
            "CI/CD pipelines, containers, release automation",
            "You are a deployment engineer. Set up CI/CD, container builds and release \
             automation for the existing code.",
        ),
        builtin(
            "security-engineer",
            "Security Engineer",
            "Audits code and infrastructure for vulnerabilities",
            Independent,
            40,
            &["security", "vulnerability", "vulnerabilities", "owasp", "audit", "encryption", "xss", "csrf", "pentest"],
            "threat model, vulnerabilities, mitigations",
            "You are a security engineer. Identify vulnerabilities and propose concrete \
             mitigations.",
        ),
        builtin(
            "code-reviewer",
            "Code Reviewer",
            "Reviews code for correctness, readability and maintainability",
            Independent,
            40,
            &["review", "refactor", "readability", "lint", "smell"],
            "correctness, readability, maintainability",
            "You are a code reviewer. Review the code for correctness, readability and \
             maintainability, and give actionable feedback.",
        ),
        builtin(
            GENERAL_SPECIALIST,
            "General Developer",
            "Handles tasks no other specialist covers",
            Independent,
            DEFAULT_PRECEDENCE,
            &[],
            "the complete task",
            "You are a skilled software developer. Plan first, then implement. Write clean, \
             minimal code that satisfies the requirements. When done, summarize what you did.",
        ),
        internal(
            SPLITTER_SPECIALIST,
            "Splitter",
            "Decomposes a task into specialist assignments",
            "Decide which specialists a task needs. Answer with JSON only: \
             {\"agents_needed\": [\"backend\"], \"execution_strategy\": \"sequential\", \
             \"execution_order\": [{\"agent\": \"backend\", \"focus\": \"...\"}]}",
        ),
        internal(
            PROMPT_ENGINEER_SPECIALIST,
            "Prompt Engineer",
            "Rewrites instructions into precise prompts",
            "Rewrite the instruction into a precise prompt without changing its intent. \
             Answer with `### Perfected Prompt`, then `### Questions Needed` (numbered, or \
             `None`).",
        ),
        internal(
            COMPOSER_SPECIALIST,
            "Composer",
            "Validates that outputs from several specialists integrate",
            "Compare the outputs for contract mismatches. Answer with `### Verdict` \
             (CONSISTENT or ISSUES_FOUND) and `### Issues` as `- [specialist] description` lines.",
        ),
    ];

    let mut full_stack = SpecialistDef::new(FULL_STACK_CATEGORY, "Full Stack");
    full_stack.description = Some("Backend first, then a frontend integrated against it".to_string());
    full_stack.members = vec![
        CompositeMember {
            specialist: "backend".to_string(),
            focus: Some("API endpoint definitions, database schema, service architecture".to_string()),
        },
        CompositeMember {
            specialist: "frontend".to_string(),
            focus: Some(
                "components, styling, state management, frontend integration with backend API"
                    .to_string(),
            ),
        },
    ];
    defs.push(full_stack);
    defs
}
