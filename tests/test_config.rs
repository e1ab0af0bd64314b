//! The shipped config file must load and point somewhere sensible.

use std::path::Path;

use project_beacon::config::{load_from, Overrides, DEFAULT_CONFIG_PATH, DEFAULT_ENDPOINT};

#[test]
fn shipped_config_loads() {
    let cfg = load_from(Path::new(DEFAULT_CONFIG_PATH), Overrides::default())
        .expect("config/default.toml should parse");
    assert_eq!(cfg.beacon.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(cfg.beacon.no_project_id, "0");
    assert!(!cfg.beacon.embedded);
    assert!(cfg.preferences_file.starts_with(&cfg.work_dir));
    assert_eq!(cfg.news.id, "new-compiler");
    assert!(cfg.news.link.is_some());
}

#[test]
fn shipped_config_accepts_work_dir_override() {
    let cfg = load_from(
        Path::new(DEFAULT_CONFIG_PATH),
        Overrides { work_dir: Some("/tmp/beacon-test"), ..Overrides::default() },
    )
    .unwrap();
    assert_eq!(cfg.preferences_file, Path::new("/tmp/beacon-test/preferences.json"));
}
