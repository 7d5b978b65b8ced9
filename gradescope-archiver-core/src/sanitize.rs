//! Name sanitation shared by directory naming, file naming and remote
//! repository naming, so all three stay consistent for the same input.

/// Keep alphanumerics plus any character listed in `allowed_extra`, then trim
/// surrounding whitespace.
pub fn sanitize(name: &str, allowed_extra: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || allowed_extra.contains(*c))
        .collect::<String>()
        .trim()
        .to_string()
}

/// Directory holding one course's assignments.
pub fn course_dir_name(display_name: &str) -> String {
    sanitize(display_name, " -")
}

/// Directory holding one assignment's artifacts.
pub fn assignment_dir_name(assignment_name: &str) -> String {
    sanitize(assignment_name, "._-")
}

/// Hosted repository name: alphanumerics and `-`, spaces become `-`.
pub fn repo_name(display_name: &str) -> String {
    let dashed = display_name.trim().replace(' ', "-");
    sanitize(&dashed, "-")
}

/// Downloaded artifact filename. Falls back to a generic name when nothing
/// survives sanitation.
pub fn file_name(raw: &str) -> String {
    let cleaned = sanitize(raw, "._- ");
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "downloaded_file".to_string()
    } else {
        cleaned
    }
}
