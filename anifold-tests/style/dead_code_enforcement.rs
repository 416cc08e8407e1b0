//! Dead Code Enforcement
//!
//! Production code must not silence dead code warnings or unwrap. Everything
//! from the first `#[cfg(test)]` line of a file onwards is treated as test
//! code and exempt.

use std::fs;
use std::path::{Path, PathBuf};

const PRODUCTION_CRATES: [&str; 3] = ["anifold-core", "anifold-web", "anifold-cli"];

#[derive(Debug)]
struct Violation {
    file_path: String,
    line_number: usize,
    pattern: &'static str,
    context: String,
}

fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(".."))
}

fn rust_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            rust_files(&path, files);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            files.push(path);
        }
    }
}

fn scan(path: &Path, content: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        for pattern in ["#[allow(dead_code)]", ".unwrap()"] {
            if trimmed.contains(pattern) {
                violations.push(Violation {
                    file_path: path.display().to_string(),
                    line_number: index + 1,
                    pattern,
                    context: trimmed.to_string(),
                });
            }
        }
    }
    violations
}

#[test]
fn test_production_code_has_no_dead_code_allowances_or_unwraps() {
    let root = workspace_root();
    let mut files = Vec::new();
    for krate in PRODUCTION_CRATES {
        rust_files(&root.join(krate).join("src"), &mut files);
    }
    assert!(!files.is_empty(), "No sources found under {}", root.display());

    let violations: Vec<Violation> = files
        .iter()
        .filter_map(|path| fs::read_to_string(path).ok().map(|c| scan(path, &c)))
        .flatten()
        .collect();

    if !violations.is_empty() {
        for v in &violations {
            eprintln!("{}:{} {} -> {}", v.file_path, v.line_number, v.pattern, v.context);
        }
        panic!("{} style violation(s) in production code", violations.len());
    }
}

#[test]
fn test_test_modules_are_exempt() {
    let content = "fn real() {}\n#[cfg(test)]\nmod tests {\n    fn t() { Some(1).unwrap(); }\n}\n";
    assert!(scan(Path::new("lib.rs"), content).is_empty());

    let content = "fn real() { Some(1).unwrap(); }\n";
    assert_eq!(scan(Path::new("lib.rs"), content).len(), 1);
}
