//! File extension to LSP `languageId` mapping.

use std::path::Path;

/// Detect the `languageId` sent in `didOpen` for `path`.
///
/// Unknown extensions fall back to `plaintext`.
#[must_use]
pub fn detect_language_id(path: &Path) -> &'static str {
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        match name {
            "Dockerfile" => return "dockerfile",
            "Makefile" | "makefile" | "GNUmakefile" => return "makefile",
            _ => {}
        }
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "rs" => "rust",
        "go" => "go",
        "mod" if is_go_module_file(path) => "go.mod",
        "sum" if is_go_module_file(path) => "go.sum",
        "py" | "pyi" => "python",
        "ts" => "typescript",
        "tsx" => "typescriptreact",
        "js" | "mjs" | "cjs" => "javascript",
        "jsx" => "javascriptreact",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "rb" => "ruby",
        "php" => "php",
        "swift" => "swift",
        "scala" => "scala",
        "lua" => "lua",
        "zig" => "zig",
        "hs" => "haskell",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "clj" | "cljs" | "cljc" => "clojure",
        "ml" | "mli" => "ocaml",
        "dart" => "dart",
        "sh" | "bash" | "zsh" => "shellscript",
        "ps1" => "powershell",
        "sql" => "sql",
        "html" | "htm" => "html",
        "css" => "css",
        "scss" => "scss",
        "less" => "less",
        "json" => "json",
        "jsonc" => "jsonc",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "md" | "markdown" => "markdown",
        "tex" => "latex",
        "vue" => "vue",
        "svelte" => "svelte",
        "proto" => "proto",
        "tf" => "terraform",
        _ => "plaintext",
    }
}

fn is_go_module_file(path: &Path) -> bool {
    path.file_stem().and_then(|s| s.to_str()) == Some("go")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_extensions() {
        assert_eq!(detect_language_id(Path::new("/src/main.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("main.go")), "go");
        assert_eq!(detect_language_id(Path::new("app.TSX")), "typescriptreact");
        assert_eq!(detect_language_id(Path::new("lib/util.py")), "python");
    }

    #[test]
    fn test_special_file_names() {
        assert_eq!(detect_language_id(Path::new("go.mod")), "go.mod");
        assert_eq!(detect_language_id(Path::new("deploy/Dockerfile")), "dockerfile");
        assert_eq!(detect_language_id(Path::new("Makefile")), "makefile");
    }

    #[test]
    fn test_unknown_falls_back_to_plaintext() {
        assert_eq!(detect_language_id(Path::new("notes.weird")), "plaintext");
        assert_eq!(detect_language_id(Path::new("LICENSE")), "plaintext");
        assert_eq!(detect_language_id(Path::new("other.mod")), "plaintext");
    }
}
