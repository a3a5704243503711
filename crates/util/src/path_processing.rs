use std::path::{Path, PathBuf};

use dirs_next::home_dir;

pub fn expand_tilde(path: &str) -> PathBuf {
    let p = path.trim();
    if p == "~" {
        return home_dir().unwrap_or_else(|| PathBuf::from("~"));
    }
    if let Some(rest) = p.strip_prefix("~/") {
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    if let Some(rest) = p.strip_prefix("~\\") {
        // Windows-style
        return home_dir().unwrap_or_else(|| PathBuf::from("~")).join(rest);
    }
    PathBuf::from(p)
}

/// Expands `~` and anchors relative paths at `base` (typically the directory
/// holding the configuration file that mentioned them).
pub fn resolve_relative(base: &Path, path: &Path) -> PathBuf {
    let expanded = expand_tilde(&path.to_string_lossy());
    if expanded.is_absolute() { expanded } else { base.join(expanded) }
}

/// Whether `path` names a mapping rule document (`.json`, `.yaml` or `.yml`).
pub fn is_rule_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()).map(str::to_ascii_lowercase).as_deref(),
        Some("json" | "yaml" | "yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_anchor_at_base() {
        let base = Path::new("/etc/confmap");
        assert_eq!(resolve_relative(base, Path::new("rules")), PathBuf::from("/etc/confmap/rules"));
        assert_eq!(resolve_relative(base, Path::new("/srv/rules")), PathBuf::from("/srv/rules"));
    }

    #[test]
    fn tilde_paths_ignore_base() {
        if let Some(home) = home_dir() {
            assert_eq!(resolve_relative(Path::new("/etc"), Path::new("~/rules")), home.join("rules"));
        }
    }

    #[test]
    fn recognizes_rule_extensions() {
        assert!(is_rule_file(Path::new("rules/sts.yaml")));
        assert!(is_rule_file(Path::new("rules/sts.YML")));
        assert!(is_rule_file(Path::new("rules/sts.json")));
        assert!(!is_rule_file(Path::new("rules/sts.yaml.bak")));
        assert!(!is_rule_file(Path::new("rules/README")));
    }
}
