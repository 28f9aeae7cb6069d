//! File extension to language classification

use std::path::Path;

/// Lower-cased extension of the final path segment, if it has one.
///
/// Dotfiles such as `.gitignore` and names without a dot have no extension.
pub fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Language for a lower-cased extension. Unknown extensions have none and are
/// never reported as a language.
pub fn language_for(ext: &str) -> Option<&'static str> {
    let language = match ext {
        "ts" | "tsx" => "TypeScript",
        "js" | "jsx" => "JavaScript",
        "swift" => "Swift",
        "py" => "Python",
        "java" => "Java",
        "kt" => "Kotlin",
        "go" => "Go",
        "c" => "C",
        "cpp" | "hpp" => "C++",
        "h" => "C/C++",
        "cs" => "C#",
        "css" => "CSS",
        "scss" => "SCSS",
        "sass" => "SASS",
        "less" => "LESS",
        "html" => "HTML",
        "vue" => "Vue",
        "svelte" => "Svelte",
        "dart" => "Dart",
        "rs" => "Rust",
        "rb" => "Ruby",
        "php" => "PHP",
        "sh" | "bash" => "Shell",
        "sql" => "SQL",
        "md" | "markdown" => "Markdown",
        "yaml" | "yml" => "YAML",
        "json" => "JSON",
        "lua" => "Lua",
        "r" => "R",
        "sol" => "Solidity",
        "pl" => "Perl",
        _ => return None,
    };
    Some(language)
}
