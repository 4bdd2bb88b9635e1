use super::*;
use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name: &str| vars.get(name).cloned()
}

#[test]
fn missing_file_and_env_yield_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_with(&dir.path().join("absent.toml"), env(&[])).expect("load");
    assert_eq!(settings, Settings::default());
}

#[test]
fn file_values_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dashboard.toml");
    fs::write(
        &path,
        "api_url = \"https://governance.example.com/api/v1\"\ntrend_days = 7\noverview_refresh_seconds = 0\n",
    )
    .expect("write config");

    let settings = load_settings_with(&path, env(&[])).expect("load");

    assert_eq!(settings.api_url, "https://governance.example.com/api/v1");
    assert_eq!(settings.trend_days, 7);
    assert_eq!(settings.dashboard().overview_refetch_interval, None);
    assert_eq!(settings.dashboard().trend_days, 7);
}

#[test]
fn environment_overrides_file_and_app_prefix_wins() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dashboard.toml");
    fs::write(&path, "api_url = \"http://file\"\n").expect("write config");

    let settings = load_settings_with(
        &path,
        env(&[
            ("DASHBOARD_API_URL", "http://plain"),
            ("APP__API_URL", "http://prefixed"),
            ("APP__TOP_RISKS_LIMIT", "10"),
            ("APP__TREND_DAYS", "not-a-number"),
        ]),
    )
    .expect("load");

    assert_eq!(settings.api_url, "http://prefixed");
    assert_eq!(settings.top_risks_limit, 10);
    assert_eq!(settings.trend_days, 30);
}

#[test]
fn malformed_file_is_an_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dashboard.toml");
    fs::write(&path, "trend_days = \"thirty\"").expect("write config");

    let err = load_settings_with(&path, env(&[])).expect_err("bad type");
    assert!(err.to_string().contains("invalid config"), "{err}");
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(normalize_database_url("./data/test.db"), "sqlite://./data/test.db");
    assert_eq!(normalize_database_url("sqlite:state.db"), "sqlite://state.db");
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("  "), Settings::default().database_url);
}

#[test]
fn request_timeout_never_drops_to_zero() {
    let settings = Settings {
        request_timeout_seconds: 0,
        ..Settings::default()
    };
    assert_eq!(settings.request_timeout(), Duration::from_secs(1));
}
