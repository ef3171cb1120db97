use mirror_core::{Outcome, RefUpdate, RefUpdateKind};

/// Format a key-value pair for display.
pub fn kv(key: &str, value: &str) -> String {
    format!("{key:>16}: {value}")
}

/// Format a header line.
pub fn header(title: &str) -> String {
    format!("=== {title} ===")
}

pub fn short(id: Option<mirror_core::ObjectId>) -> String {
    id.map_or_else(|| "-".to_string(), |id| id.short())
}

/// `  create       refs/heads/x  - -> 1a2b3c4d`
pub fn update_line(update: &RefUpdate) -> String {
    let marker = match update.kind {
        RefUpdateKind::Force => "+",
        RefUpdateKind::Delete => "-",
        _ => " ",
    };
    let mut line = format!(
        "{marker} {:<12} {}  {} -> {}",
        update.kind.name(),
        update.name,
        short(update.old_id),
        short(update.new_id)
    );
    if let Some(source) = &update.source_name {
        line.push_str(&format!("  (from {source})"));
    }
    line
}

pub fn outcome_line(name: &str, outcome: &Outcome) -> String {
    format!("  {name}: {outcome}")
}
