//! Naming - ループ名の自動採番
//!
//! プロセス全体で共有する連番カウンタ。明示的な後始末は不要。

use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_NAME_PREFIX: &str = "ControlledLoop-";

static NEXT_LOOP_NUMBER: AtomicU64 = AtomicU64::new(0);

/// 次の `ControlledLoop-{n}` を払い出す
pub fn next_loop_name() -> String {
    let n = NEXT_LOOP_NUMBER.fetch_add(1, Ordering::Relaxed);
    format!("{DEFAULT_NAME_PREFIX}{n}")
}

/// 空白・未指定なら自動採番
pub fn resolve_name(name: Option<&str>) -> String {
    match name.map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => next_loop_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashSet;

    #[test]
    fn test_generated_names_are_unique() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..100).map(|_| next_loop_name()).collect::<Vec<_>>()))
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for name in h.join().unwrap() {
                assert!(name.starts_with(DEFAULT_NAME_PREFIX));
                assert!(seen.insert(name));
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[rstest]
    #[case(None)]
    #[case(Some(""))]
    #[case(Some("   "))]
    fn test_blank_names_are_generated(#[case] name: Option<&str>) {
        assert!(resolve_name(name).starts_with(DEFAULT_NAME_PREFIX));
    }

    #[test]
    fn test_explicit_name_is_kept() {
        assert_eq!(resolve_name(Some(" poller ")), "poller");
    }
}
