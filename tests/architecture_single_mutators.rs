use std::fs;
use std::path::{Path, PathBuf};

/// Only the wallet ledger may persist wallets
const ALLOWED_WALLET_WRITERS: &[&str] = &["src/services/ledger.rs"];

/// Only the order engine may call the exchange gateway (tests excepted)
const ALLOWED_GATEWAY_CALLERS: &[&str] = &["src/platform/engine.rs", "src/exchange/paper.rs"];

fn collect_rust_files(root: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(root) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rust_files(&path, out);
            continue;
        }
        if path.extension().and_then(|s| s.to_str()) == Some("rs") {
            out.push(path);
        }
    }
}

fn offenders(needle: &str, allowed: &[&str]) -> Vec<String> {
    let repo_root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    collect_rust_files(&repo_root.join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let rel = file
            .strip_prefix(repo_root)
            .unwrap_or(&file)
            .to_string_lossy()
            .replace('\\', "/");
        if allowed.iter().any(|a| *a == rel) {
            continue;
        }
        let content = fs::read_to_string(&file).unwrap_or_default();
        for (idx, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.contains(needle) {
                offenders.push(format!("{rel}:{}: {}", idx + 1, trimmed));
            }
        }
    }
    offenders
}

#[test]
fn wallets_are_only_written_by_the_ledger() {
    let found = offenders(".save_wallet(", ALLOWED_WALLET_WRITERS);
    assert!(
        found.is_empty(),
        "wallet write outside the ledger:\n{}",
        found.join("\n")
    );
}

#[test]
fn gateway_is_only_called_by_the_order_engine() {
    let found = offenders(".execute_order(", ALLOWED_GATEWAY_CALLERS);
    assert!(
        found.is_empty(),
        "exchange gateway called outside the order engine:\n{}",
        found.join("\n")
    );
}
