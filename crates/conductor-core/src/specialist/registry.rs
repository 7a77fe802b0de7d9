//! Specialist registry: built-in specialists merged with definitions
//! discovered on disk.
//!
//! The registry is an immutable snapshot: it is built once, shared as
//! `Arc<SpecialistRegistry>`, and replaced wholesale by [`SpecialistRegistry::refresh`].
//! Lookups never touch the filesystem.
//!
//! Merge policy:
//! - a file whose id matches a built-in is rejected, the built-in wins
//! - a file whose id was already loaded from an earlier file is rejected, the first wins
//! - unreadable or malformed files are rejected
//!
//! Every rejection is kept as a [`LoadDiagnostic`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::definition::{builtin_specialists, SpecialistDef, GENERAL_SPECIALIST};
use crate::error::{OrchestrationError, Result};

/// Environment variable naming an extra specialist directory.
pub const AGENTS_DIR_ENV: &str = "CONDUCTOR_AGENTS_DIR";

/// A definition file that was not loaded, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadDiagnostic {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct SpecialistRegistry {
    specialists: BTreeMap<String, Arc<SpecialistDef>>,
    diagnostics: Vec<LoadDiagnostic>,
    dirs: Vec<PathBuf>,
}

impl SpecialistRegistry {
    /// The built-in set only.
    pub fn builtin() -> Self {
        Self::from_defs(builtin_specialists())
    }

    /// A registry holding exactly `defs`, all treated as built-in.
    pub fn from_defs(defs: Vec<SpecialistDef>) -> Self {
        let specialists = defs
            .into_iter()
            .map(|d| (d.id.clone(), Arc::new(d)))
            .collect();
        Self {
            specialists,
            diagnostics: Vec::new(),
            dirs: Vec::new(),
        }
    }

    /// Built-ins merged with every definition found in `dirs`.
    pub fn load(dirs: &[PathBuf]) -> Self {
        let mut registry = Self::builtin();
        registry.merge_dirs(dirs);
        registry
    }

    /// Build a fresh snapshot from the same base set and directories.
    /// Plans already running keep the snapshot they were started with.
    pub fn refresh(&self) -> Self {
        let base = self
            .specialists
            .values()
            .filter(|d| d.source == super::SpecialistSource::Builtin)
            .map(|d| d.as_ref().clone())
            .collect();
        let mut registry = Self::from_defs(base);
        registry.merge_dirs(&self.dirs);
        registry
    }

    /// Directories searched by default: `$CONDUCTOR_AGENTS_DIR`, then
    /// `~/.conductor/agents`, then `extra`. Missing directories are dropped.
    pub fn default_dirs(extra: &[PathBuf]) -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Ok(dir) = std::env::var(AGENTS_DIR_ENV) {
            if !dir.trim().is_empty() {
                found.push(PathBuf::from(dir));
            }
        }
        if let Some(home) = dirs::home_dir() {
            found.push(home.join(".conductor").join("agents"));
        }
        found.extend(extra.iter().cloned());

        let mut seen = std::collections::HashSet::new();
        found.into_iter()
            .filter(|d| d.is_dir() && seen.insert(d.clone()))
            .collect()
    }

    fn merge_dirs(&mut self, dirs: &[PathBuf]) {
        for dir in dirs {
            self.dirs.push(dir.clone());
            match definition_files(dir) {
                Ok(files) => {
                    for path in files {
                        self.merge_file(&path);
                    }
                }
                Err(reason) => {
                    tracing::warn!("[SpecialistRegistry] {}", reason);
                    self.diagnostics.push(LoadDiagnostic {
                        path: dir.clone(),
                        reason,
                    });
                }
            }
        }
    }

    fn merge_file(&mut self, path: &Path) {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let parsed = match ext {
            "yaml" | "yml" => SpecialistDef::from_file(path),
            "md" => SpecialistDef::from_markdown(path),
            _ => return,
        };

        let def = match parsed {
            Ok(def) => def,
            Err(reason) => {
                self.reject(path, reason);
                return;
            }
        };

        if let Some(existing) = self.specialists.get(&def.id) {
            let reason = format!(
                "Specialist '{}' conflicts with an existing definition ({}), skipping",
                def.id, existing.source
            );
            self.reject(path, reason);
            return;
        }

        tracing::info!(
            "[SpecialistRegistry] Loaded specialist: {} ({}) from {}",
            def.id,
            def.name,
            path.display()
        );
        self.specialists.insert(def.id.clone(), Arc::new(def));
    }

    fn reject(&mut self, path: &Path, reason: String) {
        tracing::warn!("[SpecialistRegistry] {}: {}", path.display(), reason);
        self.diagnostics.push(LoadDiagnostic {
            path: path.to_path_buf(),
            reason,
        });
    }

    /// Resolve an id to an invocable specialist. Composites are not invocable.
    pub fn resolve(&self, id: &str) -> Result<Arc<SpecialistDef>> {
        match self.specialists.get(id) {
            Some(def) if !def.is_composite() => Ok(def.clone()),
            _ => Err(OrchestrationError::SpecialistNotFound(id.to_string())),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SpecialistDef> {
        self.specialists.get(id).map(|d| d.as_ref())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.specialists.contains_key(id)
    }

    /// `(id, description)` for every specialist, sorted by id.
    pub fn list(&self) -> Vec<(String, String)> {
        self.specialists
            .values()
            .map(|d| (d.id.clone(), d.description_or_name().to_string()))
            .collect()
    }

    pub fn specialists(&self) -> impl Iterator<Item = &SpecialistDef> {
        self.specialists.values().map(|d| d.as_ref())
    }

    /// Specialists the splitter may route user work to.
    pub fn routable(&self) -> impl Iterator<Item = &SpecialistDef> {
        self.specialists().filter(|d| d.is_routable())
    }

    /// The fallback for unclassifiable tasks: `general` when registered,
    /// else the routable specialist with the lowest precedence.
    pub fn default_specialist(&self) -> String {
        if self.resolve(GENERAL_SPECIALIST).is_ok() {
            return GENERAL_SPECIALIST.to_string();
        }
        self.routable()
            .min_by_key(|d| d.precedence)
            .map(|d| d.id.clone())
            .unwrap_or_else(|| GENERAL_SPECIALIST.to_string())
    }

    pub fn diagnostics(&self) -> &[LoadDiagnostic] {
        &self.diagnostics
    }

    pub fn len(&self) -> usize {
        self.specialists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specialists.is_empty()
    }
}

/// Definition files in `dir`, sorted by path.
fn definition_files(dir: &Path) -> std::result::Result<Vec<PathBuf>, String> {
    if !dir.is_dir() {
        return Err(format!("Specialist directory '{}' does not exist", dir.display()));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory '{}': {}", dir.display(), e))?
    {
        let entry = entry.map_err(|e| format!("Directory entry error: {}", e))?;
        let path = entry.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
