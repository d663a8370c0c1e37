// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Options file and data directory resolution.

use std::path::{Path, PathBuf};

pub const OPTIONS_ENV: &str = "KEEPALIVE_OPTIONS";
pub const DATA_DIR_ENV: &str = "KEEPALIVE_DATA_DIR";
pub const DEFAULT_OPTIONS_PATH: &str = "/data/options.json";

const ADDON_DATA_ROOT: &str = "/data";
const STATE_FILE: &str = "state.json";

/// Path of the options document.
pub fn options_path() -> PathBuf {
    options_path_from(|key| std::env::var(key).ok())
}

fn options_path_from(env: impl Fn(&str) -> Option<String>) -> PathBuf {
    env(OPTIONS_ENV)
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OPTIONS_PATH))
}

/// Return the application data directory. The add-on `/data` mount wins when
/// present; otherwise a conventional per-user location.
pub fn data_dir() -> PathBuf {
    data_dir_from(
        |key| std::env::var(key).ok(),
        Path::new(ADDON_DATA_ROOT).is_dir(),
    )
}

fn data_dir_from(env: impl Fn(&str) -> Option<String>, addon_root_present: bool) -> PathBuf {
    if let Some(explicit) = env(DATA_DIR_ENV).filter(|v| !v.trim().is_empty()) {
        return PathBuf::from(explicit);
    }
    if addon_root_present {
        return PathBuf::from(ADDON_DATA_ROOT);
    }
    // Try XDG data dir, then fallback to home
    let base = env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .or_else(|| env("HOME").map(|home| PathBuf::from(home).join(".local").join("share")))
        .unwrap_or_else(std::env::temp_dir);
    base.join("printer-keepalive")
}

/// The configured state file, or `state.json` inside the data directory.
pub fn state_path(configured: Option<&Path>, data_dir: &Path) -> PathBuf {
    configured
        .map(Path::to_path_buf)
        .unwrap_or_else(|| data_dir.join(STATE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn options_default_to_addon_mount() {
        assert_eq!(options_path_from(env(&[])), PathBuf::from("/data/options.json"));
        assert_eq!(
            options_path_from(env(&[(OPTIONS_ENV, "/etc/keepalive.json")])),
            PathBuf::from("/etc/keepalive.json")
        );
        assert_eq!(
            options_path_from(env(&[(OPTIONS_ENV, "  ")])),
            PathBuf::from("/data/options.json")
        );
    }

    #[test]
    fn data_dir_precedence() {
        let explicit = env(&[(DATA_DIR_ENV, "/srv/keepalive"), ("HOME", "/home/ops")]);
        assert_eq!(data_dir_from(explicit, true), PathBuf::from("/srv/keepalive"));

        assert_eq!(data_dir_from(env(&[("HOME", "/home/ops")]), true), PathBuf::from("/data"));

        assert_eq!(
            data_dir_from(env(&[("XDG_DATA_HOME", "/xdg"), ("HOME", "/home/ops")]), false),
            PathBuf::from("/xdg/printer-keepalive")
        );
        assert_eq!(
            data_dir_from(env(&[("HOME", "/home/ops")]), false),
            PathBuf::from("/home/ops/.local/share/printer-keepalive")
        );
    }

    #[test]
    fn state_path_prefers_configured_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(state_path(None, dir.path()), dir.path().join("state.json"));
        let custom = dir.path().join("custom.json");
        assert_eq!(state_path(Some(&custom), dir.path()), custom);
    }
}
