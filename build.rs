use std::fs;
use std::path::{Path, PathBuf};

/// Tokens that would pull I/O or process control into the fitting library.
const FORBIDDEN: &[&str] = &[
    "std::fs",
    "std::net",
    "std::process",
    "File::open",
    "File::create",
    "println!",
    "eprintln!",
];

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    let mut sources = Vec::new();
    collect_rust_sources(Path::new("src"), &mut sources);
    sources.sort();

    let violations: Vec<String> = sources.iter().flat_map(|p| scan(p)).collect();
    if !violations.is_empty() {
        eprintln!("\nerror: spline-regression sources must not perform I/O:");
        for v in &violations {
            eprintln!("  - {v}");
        }
        panic!("{} I/O token(s) found under src/", violations.len());
    }
}

fn collect_rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

fn scan(path: &Path) -> Vec<String> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };
    text.lines()
        .enumerate()
        .flat_map(|(idx, line)| {
            FORBIDDEN
                .iter()
                .filter(move |token| line.contains(**token))
                .map(move |token| format!("{}:{} uses `{token}`", path.display(), idx + 1))
        })
        .collect()
}
