use uuid::Uuid;

/// Fresh row id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Convert a display name to a URL-safe kebab-case slug.
///
/// Example: "Site Plan (v2).pdf" → "site-plan-v2-pdf"
pub fn slugify(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Storage-safe file name: slugged stem, original extension kept.
///
/// Example: "Site Plan (v2).PDF" → "site-plan-v2.pdf"
pub fn storage_file_name(file_name: &str) -> String {
    let trimmed = file_name.trim();
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            let stem = slugify(stem);
            let ext = slugify(ext);
            let stem = if stem.is_empty() { "file".to_string() } else { stem };
            if ext.is_empty() {
                stem
            } else {
                format!("{}.{}", stem, ext)
            }
        }
        _ => {
            let slug = slugify(trimmed);
            if slug.is_empty() {
                "file".to_string()
            } else {
                slug
            }
        }
    }
}
