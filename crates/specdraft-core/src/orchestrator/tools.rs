//! Human-readable descriptions of agent tool calls

use serde_json::Value;

fn field<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(Value::as_str)
}

fn file_name(input: &Value) -> Option<&str> {
    field(input, "file_path").and_then(|p| p.rsplit('/').next())
}

/// Describe a tool call for the activity feed
pub fn describe(tool_name: &str, input: &Value) -> String {
    match tool_name {
        "Task" => format!(
            "Running task: {}",
            field(input, "description").unwrap_or("complex task")
        ),
        "WebSearch" => format!(
            "Searching web for: {}",
            field(input, "query").unwrap_or("information")
        ),
        "WebFetch" => format!(
            "Fetching content from: {}",
            field(input, "url").unwrap_or("web resource")
        ),
        "Write" => format!("Writing to: {}", file_name(input).unwrap_or("file")),
        "Edit" | "MultiEdit" => format!("Editing: {}", file_name(input).unwrap_or("file")),
        "Read" => format!("Reading: {}", file_name(input).unwrap_or("file")),
        "mcp__context7__get-library-docs" => format!(
            "Fetching documentation for: {}",
            field(input, "context7CompatibleLibraryID").unwrap_or("library")
        ),
        "mcp__deepwiki__ask_question" => format!(
            "Asking about: {}",
            field(input, "repoName").unwrap_or("repository")
        ),
        other => format!("Using {}", other),
    }
}

/// Path of a specification file being written, if this call writes one
pub fn spec_write_target(tool_name: &str, input: &Value) -> Option<String> {
    if tool_name != "Write" {
        return None;
    }
    field(input, "file_path")
        .filter(|path| path.ends_with("spec.md"))
        .map(str::to_string)
}
