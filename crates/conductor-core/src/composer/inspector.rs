//! Integration inspectors: find contract mismatches between specialist outputs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::executor::{AgentExecutor, DispatchRequest};
use crate::models::IntegrationIssue;
use crate::specialist::{IntegrationRole, SpecialistDef, SpecialistRegistry, COMPOSER_SPECIALIST};
use crate::text::{extract_section, list_items, truncate};

#[derive(Debug, Clone, thiserror::Error)]
pub enum InspectorError {
    #[error("Inspector unavailable: {0}")]
    Unavailable(String),

    #[error("Inspector call failed: {0}")]
    Executor(String),

    #[error("Failed to parse inspector answer: {0}")]
    Parse(String),
}

/// One succeeded SubTask's output, as seen by an inspector.
#[derive(Debug, Clone)]
pub struct InspectedOutput {
    pub subtask_id: String,
    pub specialist: String,
    pub role: IntegrationRole,
    pub content: String,
}

#[async_trait]
pub trait IntegrationInspector: Send + Sync {
    fn name(&self) -> &str;

    /// Issues across `outputs`. An empty list means the outputs are consistent.
    async fn inspect(&self, outputs: &[InspectedOutput]) -> Result<Vec<IntegrationIssue>, InspectorError>;
}

// ─── Contract heuristic ───────────────────────────────────────────────────

/// Deterministic heuristic over free text:
///
/// - endpoints (`POST /api/login`, or a bare `/api/...` path) referenced by a
///   consumer must be declared by some producer
/// - JSON keys (`"email":`) used by a consumer must appear in producer output,
///   when producers show any JSON keys at all
///
/// Issues are attributed to the consumer, which integrates against the
/// producers' contract.
#[derive(Debug, Clone, Default)]
pub struct ContractInspector;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Endpoint {
    method: Option<String>,
    path: String,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.method {
            Some(method) => write!(f, "{} {}", method, self.path),
            None => f.write_str(&self.path),
        }
    }
}

fn method_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(GET|POST|PUT|PATCH|DELETE)\s+(/[A-Za-z0-9_\-/{}:.$]*)").expect("valid regex")
    })
}

fn bare_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?:^|[\s"'`(])(/api/[A-Za-z0-9_\-/{}:.$]*)"#).expect("valid regex"))
}

fn json_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""([A-Za-z_][A-Za-z0-9_]*)"\s*:"#).expect("valid regex"))
}

/// Lowercase, no trailing punctuation or slash, parameters collapsed to `{}`.
fn normalize_path(path: &str) -> String {
    let path = path.trim_end_matches(['.', ',', ':', '/']).to_lowercase();
    let segments: Vec<String> = path
        .split('/')
        .map(|seg| {
            if seg.starts_with(':') || seg.starts_with('{') || seg.starts_with("${") {
                "{}".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect();
    let joined = segments.join("/");
    if joined.is_empty() {
        "/".to_string()
    } else {
        joined
    }
}

fn endpoints(text: &str) -> BTreeSet<Endpoint> {
    let mut found = BTreeSet::new();
    for caps in method_path_re().captures_iter(text) {
        found.insert(Endpoint {
            method: Some(caps[1].to_string()),
            path: normalize_path(&caps[2]),
        });
    }
    for caps in bare_path_re().captures_iter(text) {
        let path = normalize_path(&caps[1]);
        if !found.iter().any(|e| e.path == path) {
            found.insert(Endpoint { method: None, path });
        }
    }
    found
}

fn json_keys(text: &str) -> BTreeSet<String> {
    json_key_re()
        .captures_iter(text)
        .map(|caps| caps[1].to_string())
        .collect()
}

impl ContractInspector {
    /// Synchronous core of [`IntegrationInspector::inspect`].
    pub fn check(outputs: &[InspectedOutput]) -> Vec<IntegrationIssue> {
        let producers: Vec<&InspectedOutput> =
            outputs.iter().filter(|o| o.role == IntegrationRole::Producer).collect();
        let consumers: Vec<&InspectedOutput> =
            outputs.iter().filter(|o| o.role == IntegrationRole::Consumer).collect();
        if producers.is_empty() || consumers.is_empty() {
            return Vec::new();
        }

        let producer_ids: Vec<String> = producers.iter().map(|p| p.subtask_id.clone()).collect();
        let declared: BTreeSet<Endpoint> = producers.iter().flat_map(|p| endpoints(&p.content)).collect();
        let declared_keys: BTreeSet<String> = producers.iter().flat_map(|p| json_keys(&p.content)).collect();

        let mut issues = Vec::new();
        for consumer in consumers {
            let mut subtask_ids = vec![consumer.subtask_id.clone()];
            subtask_ids.extend(producer_ids.iter().cloned());

            for endpoint in endpoints(&consumer.content) {
                let matched = declared.iter().any(|d| {
                    d.path == endpoint.path
                        && match (&d.method, &endpoint.method) {
                            (Some(a), Some(b)) => a == b,
                            _ => true,
                        }
                });
                if !matched {
                    issues.push(IntegrationIssue {
                        description: format!(
                            "{} references {}, which no producer declares",
                            consumer.specialist, endpoint
                        ),
                        subtask_ids: subtask_ids.clone(),
                        responsible: consumer.specialist.clone(),
                    });
                }
            }

            if !declared_keys.is_empty() {
                let unknown: Vec<String> = json_keys(&consumer.content)
                    .into_iter()
                    .filter(|k| !declared_keys.contains(k))
                    .collect();
                if !unknown.is_empty() {
                    issues.push(IntegrationIssue {
                        description: format!(
                            "{} uses field(s) {} not present in the producer contract",
                            consumer.specialist,
                            unknown.join(", ")
                        ),
                        subtask_ids: subtask_ids.clone(),
                        responsible: consumer.specialist.clone(),
                    });
                }
            }
        }
        issues
    }
}

#[async_trait]
impl IntegrationInspector for ContractInspector {
    fn name(&self) -> &str {
        "contract"
    }

    async fn inspect(&self, outputs: &[InspectedOutput]) -> Result<Vec<IntegrationIssue>, InspectorError> {
        Ok(Self::check(outputs))
    }
}

// ─── Agent ────────────────────────────────────────────────────────────────

/// Asks the `composer` specialist to compare outputs. Expected answer:
///
/// ```text
/// ### Verdict
/// ISSUES_FOUND
/// ### Issues
/// - [frontend] posts `username` but the API expects `email`
/// ```
pub struct AgentInspector {
    executor: Arc<dyn AgentExecutor>,
    composer: Arc<SpecialistDef>,
    timeout: Duration,
}

impl AgentInspector {
    pub fn new(executor: Arc<dyn AgentExecutor>, composer: Arc<SpecialistDef>, timeout: Duration) -> Self {
        Self {
            executor,
            composer,
            timeout,
        }
    }

    pub fn from_registry(
        executor: Arc<dyn AgentExecutor>,
        registry: &SpecialistRegistry,
        timeout: Duration,
    ) -> Result<Self, InspectorError> {
        let composer = registry
            .resolve(COMPOSER_SPECIALIST)
            .map_err(|e| InspectorError::Unavailable(e.to_string()))?;
        Ok(Self::new(executor, composer, timeout))
    }

    fn render(outputs: &[InspectedOutput]) -> String {
        let mut prompt = String::from(
            "Check whether the outputs below integrate: endpoints, payload field names and \
             data shapes must agree between producers and consumers.\n",
        );
        for output in outputs {
            prompt.push_str(&format!(
                "\n## {} ({}, {})\n{}\n",
                output.specialist,
                output.subtask_id,
                output.role.as_str(),
                truncate(&output.content, 4000)
            ));
        }
        prompt.push_str(
            "\nOutput your response in this EXACT format:\n### Verdict\nCONSISTENT or ISSUES_FOUND\n\
             ### Issues\n- [specialist] description (or None)\n",
        );
        prompt
    }

    /// Issues from an answer. Each issue is attributed to the bracketed
    /// specialist, else to the first consumer.
    pub fn parse(content: &str, outputs: &[InspectedOutput]) -> Result<Vec<IntegrationIssue>, InspectorError> {
        let section = extract_section(content, "Verdict")
            .ok_or_else(|| InspectorError::Parse("missing ### Verdict".to_string()))?;
        let verdict = section
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .trim_matches(|c: char| c == '*' || c == '`')
            .trim()
            .to_uppercase()
            .replace(' ', "_");
        match verdict.as_str() {
            "CONSISTENT" => return Ok(Vec::new()),
            "ISSUES_FOUND" => {}
            other => {
                return Err(InspectorError::Parse(format!(
                    "unknown verdict '{}', expected CONSISTENT or ISSUES_FOUND",
                    other
                )))
            }
        }

        let mut by_specialist: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for output in outputs {
            by_specialist
                .entry(output.specialist.as_str())
                .or_default()
                .push(output.subtask_id.clone());
        }
        let fallback = outputs
            .iter()
            .find(|o| o.role == IntegrationRole::Consumer)
            .or_else(|| outputs.last())
            .map(|o| o.specialist.clone())
            .unwrap_or_default();

        let items = extract_section(content, "Issues").map(|s| list_items(&s)).unwrap_or_default();
        if items.is_empty() {
            return Err(InspectorError::Parse("ISSUES_FOUND without any issue".to_string()));
        }

        Ok(items
            .into_iter()
            .map(|item| {
                let (responsible, description) = match item.strip_prefix('[').and_then(|r| r.split_once(']')) {
                    Some((name, rest)) if by_specialist.contains_key(name.trim()) => {
                        (name.trim().to_string(), rest.trim().to_string())
                    }
                    _ => (fallback.clone(), item.clone()),
                };
                let subtask_ids = by_specialist
                    .get(responsible.as_str())
                    .cloned()
                    .unwrap_or_default();
                IntegrationIssue {
                    description,
                    subtask_ids,
                    responsible,
                }
            })
            .collect())
    }
}

#[async_trait]
impl IntegrationInspector for AgentInspector {
    fn name(&self) -> &str {
        "composer"
    }

    async fn inspect(&self, outputs: &[InspectedOutput]) -> Result<Vec<IntegrationIssue>, InspectorError> {
        let request = DispatchRequest::adhoc(self.composer.clone(), Self::render(outputs), self.timeout);
        let output = tokio::time::timeout(self.timeout, self.executor.invoke(request))
            .await
            .map_err(|_| InspectorError::Executor(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| InspectorError::Executor(e.to_string()))?;
        Self::parse(&output.content, outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(id: &str, specialist: &str, role: IntegrationRole, content: &str) -> InspectedOutput {
        InspectedOutput {
            subtask_id: id.to_string(),
            specialist: specialist.to_string(),
            role,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/api/users/:id/"), "/api/users/{}");
        assert_eq!(normalize_path("/API/Users/{userId}."), "/api/users/{}");
    }

    #[test]
    fn test_consistent_contract() {
        let outputs = vec![
            output("st-1", "backend", IntegrationRole::Producer,
                "POST /api/login accepts {\"email\": \"..\", \"password\": \"..\"} and returns {\"token\": \"..\"}"),
            output("st-2", "frontend", IntegrationRole::Consumer,
                "The form calls fetch('/api/login') with body {\"email\": e, \"password\": p}, then stores \"token\": from the response"),
        ];
        assert!(ContractInspector::check(&outputs).is_empty());
    }

    #[test]
    fn test_mismatched_endpoint_and_field() {
        let outputs = vec![
            output("st-1", "backend", IntegrationRole::Producer,
                "POST /api/login with {\"email\": \"..\", \"password\": \"..\"}"),
            output("st-2", "frontend", IntegrationRole::Consumer,
                "POST /api/signin with {\"username\": u, \"password\": p}"),
        ];
        let issues = ContractInspector::check(&outputs);
        assert_eq!(issues.len(), 2);
        assert!(issues[0].description.contains("POST /api/signin"));
        assert!(issues[1].description.contains("username"));
        assert!(issues.iter().all(|i| i.responsible == "frontend"));
        assert_eq!(issues[0].subtask_ids, vec!["st-2", "st-1"]);
    }

    #[test]
    fn test_no_consumers_means_no_issues() {
        let outputs = vec![
            output("st-1", "backend", IntegrationRole::Producer, "POST /api/login"),
            output("st-2", "cloud", IntegrationRole::Independent, "GET /api/other"),
        ];
        assert!(ContractInspector::check(&outputs).is_empty());
    }

    #[test]
    fn test_parse_agent_answer() {
        let outputs = vec![
            output("st-1", "backend", IntegrationRole::Producer, "x"),
            output("st-2", "frontend", IntegrationRole::Consumer, "y"),
        ];
        let issues = AgentInspector::parse(
            "### Verdict\nISSUES_FOUND\n### Issues\n- [backend] returns `jwt` not `token`\n- field casing differs\n",
            &outputs,
        )
        .unwrap();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].responsible, "backend");
        assert_eq!(issues[0].subtask_ids, vec!["st-1"]);
        assert_eq!(issues[1].responsible, "frontend");

        let none = AgentInspector::parse("### Verdict\nCONSISTENT\n### Issues\nNone", &outputs).unwrap();
        assert!(none.is_empty());
        assert!(AgentInspector::parse("looks fine", &outputs).is_err());
    }

    #[test]
    fn test_parse_verdict_is_whole_token() {
        let outputs = vec![
            output("st-1", "backend", IntegrationRole::Producer, "x"),
            output("st-2", "frontend", IntegrationRole::Consumer, "y"),
        ];
        let issues = "### Issues\n- [backend] x\n";

        for verdict in ["INCONSISTENT", "NOT CONSISTENT", "consistent-ish"] {
            let answer = format!("### Verdict\n{}\n{}", verdict, issues);
            assert!(
                matches!(AgentInspector::parse(&answer, &outputs), Err(InspectorError::Parse(_))),
                "verdict {:?} should not parse",
                verdict
            );
        }

        let found = AgentInspector::parse(&format!("### Verdict\n**Issues found**\n{}", issues), &outputs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].responsible, "backend");

        let clean = AgentInspector::parse("### Verdict:\n`consistent`\n", &outputs).unwrap();
        assert!(clean.is_empty());
    }
}
