//! `conductor specialists`: list registered specialists and load problems.

use std::fmt::Write as _;

use conductor_core::specialist::{IntegrationRole, SpecialistRegistry};
use conductor_core::truncate;

use super::Context;

pub fn run(ctx: &Context, json: bool) -> Result<(), String> {
    if json {
        let specialists: Vec<_> = ctx.registry.specialists().collect();
        let value = serde_json::json!({
            "specialists": specialists,
            "diagnostics": ctx.registry.diagnostics().iter().map(|d| serde_json::json!({
                "path": d.path.display().to_string(),
                "reason": d.reason,
            })).collect::<Vec<_>>(),
        });
        super::print_json(&value);
    } else {
        print!("{}", render(&ctx.registry));
    }
    Ok(())
}

/// One line per specialist, sorted by id, then any skipped definitions.
pub fn render(registry: &SpecialistRegistry) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<20} {:<12} {:>4}  {:<10} DESCRIPTION", "ID", "ROLE", "PREC", "SOURCE");

    for def in registry.specialists() {
        let role = if def.is_composite() {
            let members: Vec<&str> = def.members.iter().map(|m| m.specialist.as_str()).collect();
            format!("composite({})", members.join("+"))
        } else if def.internal {
            "internal".to_string()
        } else {
            match def.role {
                IntegrationRole::Producer => "producer",
                IntegrationRole::Consumer => "consumer",
                IntegrationRole::Independent => "independent",
            }
            .to_string()
        };
        let _ = writeln!(
            out,
            "{:<20} {:<12} {:>4}  {:<10} {}",
            def.id,
            role,
            def.precedence,
            def.source.to_string(),
            truncate(def.description_or_name(), 60)
        );
    }

    let diagnostics = registry.diagnostics();
    if !diagnostics.is_empty() {
        let _ = writeln!(out, "\nSkipped {} definition(s):", diagnostics.len());
        for d in diagnostics {
            let _ = writeln!(out, "  {}: {}", d.path.display(), d.reason);
        }
    }
    out
}
