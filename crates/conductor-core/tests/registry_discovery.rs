use std::fs;

use conductor_core::specialist::{SpecialistSource, DEFAULT_PRECEDENCE};
use conductor_core::SpecialistRegistry;

#[test]
fn test_directory_definitions_merge_with_builtins() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("graphql.yaml"),
        "id: graphql\nname: GraphQL Expert\nrole: producer\nkeywords: [graphql, schema]\ninstructions: Design GraphQL schemas.\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("tech-writer.md"),
        "---\nname: Tech Writer\nkeywords: [docs, readme]\n---\nWrite clear documentation.\n",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let registry = SpecialistRegistry::load(&[dir.path().to_path_buf()]);

    let graphql = registry.resolve("graphql").unwrap();
    assert_eq!(graphql.name, "GraphQL Expert");
    assert_eq!(graphql.precedence, DEFAULT_PRECEDENCE);
    assert_eq!(graphql.source, SpecialistSource::File(dir.path().join("graphql.yaml")));

    let writer = registry.resolve("tech-writer").unwrap();
    assert_eq!(writer.instructions, "Write clear documentation.");
    assert!(registry.resolve("backend").is_ok());
    assert!(registry.diagnostics().is_empty());
}

#[test]
fn test_conflicting_and_malformed_files_become_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("backend.yaml"),
        "id: backend\nname: Impostor\ninstructions: Pretend.\n",
    )
    .unwrap();
    fs::write(dir.path().join("broken.yaml"), "id: [unclosed\n").unwrap();

    let registry = SpecialistRegistry::load(&[dir.path().to_path_buf()]);

    assert_ne!(registry.get("backend").unwrap().name, "Impostor");
    assert_eq!(registry.get("backend").unwrap().source, SpecialistSource::Builtin);

    let diagnostics = registry.diagnostics();
    assert_eq!(diagnostics.len(), 2);
    assert!(diagnostics.iter().any(|d| d.path.ends_with("backend.yaml") && d.reason.contains("conflicts")));
    assert!(diagnostics.iter().any(|d| d.path.ends_with("broken.yaml")));
}

#[test]
fn test_refresh_builds_new_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let registry = SpecialistRegistry::load(&[dir.path().to_path_buf()]);
    assert!(!registry.contains("late-arrival"));

    fs::write(dir.path().join("late-arrival.md"), "Arrive late.\n").unwrap();
    let refreshed = registry.refresh();

    assert!(refreshed.contains("late-arrival"));
    assert!(!registry.contains("late-arrival"));
    assert_eq!(refreshed.len(), registry.len() + 1);
}

#[test]
fn test_composite_is_not_invocable() {
    let registry = SpecialistRegistry::builtin();
    assert!(registry.contains("full-stack"));
    assert!(registry.resolve("full-stack").is_err());
    assert!(registry.routable().all(|d| !d.internal && d.members.is_empty()));
}

#[test]
fn test_duplicate_id_across_files_keeps_first_sorted() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("a-reviewer.yaml"),
        "id: reviewer\nname: First Reviewer\ninstructions: Review carefully.\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b-reviewer.yaml"),
        "id: reviewer\nname: Second Reviewer\ninstructions: Review quickly.\n",
    )
    .unwrap();

    let registry = SpecialistRegistry::load(&[dir.path().to_path_buf()]);

    assert_eq!(registry.get("reviewer").unwrap().name, "First Reviewer");
    let diagnostics = registry.diagnostics();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].path.ends_with("b-reviewer.yaml"));
}
