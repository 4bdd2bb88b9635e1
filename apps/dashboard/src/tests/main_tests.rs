use super::*;

#[test]
fn log_filter_defaults_to_info() {
    assert_eq!(log_filter(None).to_string(), "info");
    assert_eq!(log_filter(Some("  ".to_string())).to_string(), "info");
}

#[test]
fn log_filter_honours_rust_log() {
    assert_eq!(log_filter(Some("debug".to_string())).to_string(), "debug");
}

#[test]
fn cli_accepts_watch_route() {
    let args = Args::try_parse_from(["dashboard", "--api-url", "http://api", "watch", "--route", "/findings"])
        .expect("parse");
    assert_eq!(args.api_url.as_deref(), Some("http://api"));
    assert!(matches!(args.command, Command::Watch { ref route } if route == "/findings"));
}
