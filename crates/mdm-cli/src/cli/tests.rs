use super::*;
use clap::CommandFactory;

#[test]
fn cli_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn kind_arg_maps_to_job_kind() {
    assert_eq!(JobKind::from(KindArg::Auto), JobKind::Auto);
    assert_eq!(JobKind::from(KindArg::Youtube), JobKind::Youtube);
    assert_eq!(JobKind::from(KindArg::Pinterest), JobKind::Pinterest);
}

#[test]
fn add_accepts_options_json() {
    let cli = Cli::try_parse_from([
        "mdm",
        "add",
        "https://example.com/f.bin",
        "--kind",
        "file",
        "--options",
        r#"{"filenameHint":"f"}"#,
    ])
    .unwrap();
    match cli.command {
        CliCommand::Add { url, options, .. } => {
            assert_eq!(url, "https://example.com/f.bin");
            assert!(options.is_some());
        }
        other => panic!("unexpected command: {:?}", other),
    }
}

#[tokio::test]
async fn send_command_without_daemon_reports_undelivered() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("control.sock");
    let delivered = control_socket::send_command(&path, None, "cancel", "j1")
        .await
        .unwrap();
    assert!(!delivered);
}
