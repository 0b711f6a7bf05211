//! End-to-end update scenarios driven through a recording host.

use mpackage_updater::{
    ConsoleLevel, HostEvent, PackageHost, SemanticVersion, UpdateOutcome, UpdateState, Updater,
    UpdaterConfig, UpdaterError, INSTALL_DELAY, RUNNING_TIMEOUT, START_MAX_RETRIES,
    START_RETRY_DELAY,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

use test_utils::{config, settle, updater, HostCall, MockHost, DOWNLOAD_PATH};

#[tokio::test(start_paused = true)]
async fn newer_remote_downloads_and_swaps_package() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "0.0.1");
    let updater = updater(&host, "Map");

    assert_eq!(updater.start().await?, UpdateState::CheckingVersion);
    assert_eq!(
        host.calls(),
        vec![HostCall::GetHttp(format!("{DOWNLOAD_PATH}Map_version.txt"))]
    );

    host.respond_http(updater.version_url(), "5.0.0\n").await;
    assert_eq!(updater.state(), UpdateState::Downloading);
    assert_eq!(updater.remote_version(), Some(SemanticVersion::new(5, 0, 0)));
    assert_eq!(
        host.downloads(),
        vec![HostCall::Download {
            path: updater.archive_path().to_path_buf(),
            url: format!("{DOWNLOAD_PATH}Map.mpackage"),
        }]
    );
    assert!(updater.temp_dir().is_dir());

    let started = Instant::now();
    host.complete_download(updater.archive_path()).await;
    assert!(started.elapsed() < INSTALL_DELAY);
    assert_eq!(updater.state(), UpdateState::Swapping);
    assert!(host.timers().exists(
        updater.scope().key(),
        &updater.scope().install_timer_name()
    ));
    assert!(!host
        .calls()
        .iter()
        .any(|call| matches!(call, HostCall::Install { .. })));

    settle(&updater).await;
    assert!(started.elapsed() >= INSTALL_DELAY);
    assert_eq!(updater.state(), UpdateState::Done);
    assert!(!updater.is_in_progress());
    assert_eq!(
        updater.outcome(),
        Some(UpdateOutcome::Updated {
            from: SemanticVersion::new(0, 0, 1),
            to: SemanticVersion::new(5, 0, 0),
        })
    );

    let swap: Vec<HostCall> = host.calls().into_iter().skip(2).collect();
    assert_eq!(
        swap,
        vec![
            HostCall::Uninstall("Map".into()),
            HostCall::ClearGlobal("Map".into()),
            HostCall::Install {
                archive: updater.archive_path().to_path_buf(),
                existed: true,
            },
        ]
    );

    assert!(!updater.archive_path().exists());
    assert!(!updater.temp_dir().exists());
    assert_eq!(host.events().subscriber_count(), 0);
    assert_eq!(host.timers().pending(), 0);
    assert!(host
        .console_at(ConsoleLevel::Info)
        .iter()
        .any(|line| line.contains("updated to 5.0.0") && line.contains("Default")));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn equal_remote_never_downloads() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.2.3");
    let updater = updater(&host, "Map");

    for _ in 0..3 {
        updater.start().await?;
        host.respond_http(updater.version_url(), "1.2.3").await;
        assert_eq!(updater.state(), UpdateState::Done);
        assert_eq!(updater.outcome(), Some(UpdateOutcome::UpToDate));
    }

    assert!(host.downloads().is_empty());
    assert_eq!(host.events().subscriber_count(), 0);
    assert!(host.console_at(ConsoleLevel::Error).is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn older_remote_is_not_an_update() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "2.0.0");
    let updater = updater(&host, "Map");

    updater.start().await?;
    host.respond_http(updater.version_url(), "1.9.9\r\n").await;

    assert_eq!(updater.outcome(), Some(UpdateOutcome::UpToDate));
    assert!(host.downloads().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn newer_minor_version_triggers_download() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.2.3");
    let updater = updater(&host, "Map");

    updater.start().await?;
    host.respond_http(updater.version_url(), "1.3.0\nrelease notes follow\n")
        .await;

    assert_eq!(updater.state(), UpdateState::Downloading);
    assert_eq!(host.downloads().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn foreign_responses_leave_state_unchanged() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;

    host.respond_http(&format!("{DOWNLOAD_PATH}Other_version.txt"), "9.9.9")
        .await;
    host.events()
        .dispatch(HostEvent::HttpError {
            url: "https://example.com/unrelated.json".into(),
            error: "404".into(),
        })
        .await;
    assert_eq!(updater.state(), UpdateState::CheckingVersion);
    assert!(updater.is_in_progress());

    host.respond_http(updater.version_url(), "1.1.0").await;
    assert_eq!(updater.state(), UpdateState::Downloading);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn foreign_download_leaves_state_unchanged() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "2.0.0").await;

    let elsewhere = host.home_dir().join("Other.mpackage");
    host.complete_download(&elsewhere).await;
    host.events()
        .dispatch(HostEvent::DownloadError {
            path: PathBuf::from("/somewhere/else.mpackage"),
            error: "connection reset".into(),
            url: "https://example.com/else.mpackage".into(),
        })
        .await;

    assert_eq!(updater.state(), UpdateState::Downloading);
    assert!(!host
        .calls()
        .iter()
        .any(|call| matches!(call, HostCall::Uninstall(_) | HostCall::Install { .. })));
    assert_eq!(host.events().subscriber_count(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn http_failure_fails_and_releases_handlers() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;

    host.events()
        .dispatch(HostEvent::HttpError {
            url: updater.version_url().to_string(),
            error: "HTTP 503".into(),
        })
        .await;

    assert_eq!(updater.state(), UpdateState::Failed);
    match updater.outcome() {
        Some(UpdateOutcome::Failed(message)) => assert!(message.contains("HTTP 503")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(host.console_at(ConsoleLevel::Error).len(), 1);
    assert_eq!(host.events().subscriber_count(), 0);
    assert_eq!(host.timers().pending(), 0);

    // No automatic retry.
    assert_eq!(host.calls().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn download_failure_reports_url() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "1.0.1").await;

    host.events()
        .dispatch(HostEvent::DownloadError {
            path: updater.archive_path().to_path_buf(),
            error: "404 Not Found".into(),
            url: updater.archive_url().to_string(),
        })
        .await;

    assert_eq!(updater.state(), UpdateState::Failed);
    let errors = host.console_at(ConsoleLevel::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains(updater.archive_url()));
    assert!(!updater.temp_dir().exists());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn malformed_remote_version_fails() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;

    host.respond_http(updater.version_url(), "5.0\n").await;

    assert_eq!(updater.state(), UpdateState::Failed);
    match updater.outcome() {
        Some(UpdateOutcome::Failed(message)) => assert!(message.contains("malformed version")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(host.downloads().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn events_after_completion_are_ignored() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "1.0.0").await;
    assert_eq!(updater.state(), UpdateState::Done);

    assert_eq!(host.respond_http(updater.version_url(), "9.0.0").await, 0);
    host.complete_download(&host.home_dir().join("Map.mpackage"))
        .await;

    assert_eq!(updater.state(), UpdateState::Done);
    assert_eq!(updater.outcome(), Some(UpdateOutcome::UpToDate));
    assert_eq!(host.calls().len(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_waits_for_running_guard() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    let scope = updater.scope().clone();
    host.timers().start(
        scope.key(),
        &scope.guard_timer_name(),
        Duration::from_secs(5),
        async {},
    );

    let started = Instant::now();
    assert_eq!(updater.start().await?, UpdateState::CheckingVersion);

    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(5) + START_RETRY_DELAY + START_RETRY_DELAY);
    assert_eq!(host.calls().len(), 1);
    assert!(host
        .timers()
        .exists(scope.key(), &scope.guard_timer_name()));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn start_gives_up_when_guard_never_clears() {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    let scope = updater.scope().clone();
    host.timers().start(
        scope.key(),
        &scope.guard_timer_name(),
        Duration::from_secs(3600),
        async {},
    );

    let started = Instant::now();
    let err = updater.start().await.unwrap_err();

    assert!(matches!(err, UpdaterError::Busy(name) if name == "Map"));
    assert!(started.elapsed() >= START_RETRY_DELAY * START_MAX_RETRIES);
    assert_eq!(updater.state(), UpdateState::Idle);
    assert!(started.elapsed() > RUNNING_TIMEOUT * 2);
    assert!(host.calls().is_empty());
    assert_eq!(host.events().subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn stalled_attempt_is_torn_down_after_timeout() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    assert_eq!(host.events().subscriber_count(), 4);

    tokio::time::sleep(RUNNING_TIMEOUT + Duration::from_secs(1)).await;

    assert_eq!(updater.state(), UpdateState::Failed);
    match updater.outcome() {
        Some(UpdateOutcome::Failed(message)) => assert!(message.contains("timed out")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(host.events().subscriber_count(), 0);

    // A late response no longer has anyone listening.
    assert_eq!(host.respond_http(updater.version_url(), "2.0.0").await, 0);
    assert!(host.downloads().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn fresh_start_reclaims_slot_from_stalled_attempt() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let stale = updater(&host, "Map");
    stale.start().await?;

    let fresh = updater(&host, "Map");
    let started = Instant::now();
    assert_eq!(fresh.start().await?, UpdateState::CheckingVersion);

    assert!(started.elapsed() >= RUNNING_TIMEOUT);
    assert_eq!(stale.state(), UpdateState::Failed);
    match stale.outcome() {
        Some(UpdateOutcome::Failed(message)) => assert!(message.contains("timed out")),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(host.events().subscriber_count(), 4);

    host.respond_http(fresh.version_url(), "1.0.0").await;
    assert_eq!(fresh.outcome(), Some(UpdateOutcome::UpToDate));
    assert_eq!(stale.state(), UpdateState::Failed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn guard_expiry_does_not_interrupt_swap() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "2.0.0").await;

    // The download lands just before the running guard would expire, so the
    // install is still pending when the original deadline passes.
    tokio::time::sleep(RUNNING_TIMEOUT - INSTALL_DELAY / 2).await;
    host.complete_download(updater.archive_path()).await;
    assert_eq!(updater.state(), UpdateState::Swapping);

    tokio::time::sleep(INSTALL_DELAY / 2 + Duration::from_millis(500)).await;
    assert_eq!(updater.state(), UpdateState::Swapping);

    settle(&updater).await;
    assert_eq!(updater.state(), UpdateState::Done);
    assert_eq!(
        updater.outcome(),
        Some(UpdateOutcome::Updated {
            from: SemanticVersion::new(1, 0, 0),
            to: SemanticVersion::new(2, 0, 0),
        })
    );
    let calls = host.calls();
    let uninstall = calls
        .iter()
        .position(|call| matches!(call, HostCall::Uninstall(_)));
    let install = calls
        .iter()
        .position(|call| matches!(call, HostCall::Install { existed: true, .. }));
    assert!(matches!((uninstall, install), (Some(u), Some(i)) if u < i));
    assert_eq!(host.timers().pending(), 0);
    assert_eq!(host.events().subscriber_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_uninstall_aborts_install() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    host.fail_uninstall();
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "1.1.0").await;
    host.complete_download(updater.archive_path()).await;

    assert_eq!(updater.state(), UpdateState::Failed);
    assert!(!host
        .calls()
        .iter()
        .any(|call| matches!(call, HostCall::Install { .. })));
    assert!(!updater.temp_dir().exists());
    assert_eq!(host.package_version("Map").as_deref(), Some("1.0.0"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn failed_version_request_fails_immediately() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    host.fail_get();
    let updater = updater(&host, "Map");

    assert_eq!(updater.start().await?, UpdateState::Failed);
    assert_eq!(host.events().subscriber_count(), 0);
    assert_eq!(host.timers().pending(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_packages_do_not_cross_talk() -> anyhow::Result<()> {
    let host = MockHost::new("Default")
        .with_package("Map", "1.0.0")
        .with_package("Chat", "3.1.4");
    let map = updater(&host, "Map");
    let chat = updater(&host, "Chat");

    map.start().await?;
    chat.start().await?;
    assert_eq!(host.events().subscriber_count(), 8);

    host.respond_http(map.version_url(), "1.5.0").await;
    assert_eq!(map.state(), UpdateState::Downloading);
    assert_eq!(chat.state(), UpdateState::CheckingVersion);

    host.respond_http(chat.version_url(), "3.1.4").await;
    assert_eq!(chat.state(), UpdateState::Done);
    assert_eq!(map.state(), UpdateState::Downloading);

    host.events()
        .dispatch(HostEvent::DownloadDone {
            path: chat.archive_path().to_path_buf(),
            size: 1,
        })
        .await;
    assert_eq!(map.state(), UpdateState::Downloading);
    assert!(!host
        .calls()
        .iter()
        .any(|call| matches!(call, HostCall::Uninstall(_))));

    host.complete_download(map.archive_path()).await;
    assert_eq!(map.state(), UpdateState::Swapping);
    settle(&map).await;
    assert_eq!(map.state(), UpdateState::Done);
    assert_eq!(host.events().subscriber_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn same_package_in_two_profiles_is_isolated() -> anyhow::Result<()> {
    let first = MockHost::new("Alpha").with_package("Map", "1.0.0");
    let second = MockHost::new("Beta").with_package("Map", "1.0.0");
    let one = updater(&first, "Map");
    let two = updater(&second, "Map");

    assert_ne!(one.scope(), two.scope());
    assert_ne!(one.archive_path(), two.archive_path());

    one.start().await?;
    two.start().await?;
    first.respond_http(one.version_url(), "2.0.0").await;

    assert_eq!(one.state(), UpdateState::Downloading);
    assert_eq!(two.state(), UpdateState::CheckingVersion);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn second_start_while_running_is_a_no_op() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");

    updater.start().await?;
    assert_eq!(updater.start().await?, UpdateState::CheckingVersion);

    assert_eq!(host.calls().len(), 1);
    assert_eq!(host.events().subscriber_count(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn restarting_after_failure_runs_a_fresh_attempt() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.events()
        .dispatch(HostEvent::HttpError {
            url: updater.version_url().to_string(),
            error: "timeout".into(),
        })
        .await;
    assert_eq!(updater.state(), UpdateState::Failed);

    assert!(updater.reset());
    assert_eq!(updater.state(), UpdateState::Idle);
    assert_eq!(updater.outcome(), None);

    updater.start().await?;
    assert_eq!(updater.state(), UpdateState::CheckingVersion);
    assert_eq!(host.events().subscriber_count(), 4);
    host.respond_http(updater.version_url(), "1.0.0").await;
    assert_eq!(updater.outcome(), Some(UpdateOutcome::UpToDate));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn param_matching_accepts_signed_urls() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let config = UpdaterConfig::builder(DOWNLOAD_PATH, "Map", "Map_version.txt")
        .param("response-content-disposition", r"filename=([^;&]+)")
        .build()?;
    let updater = Updater::new(config, host.clone())?;
    updater.start().await?;

    let signed = "https://objects.githubusercontent.com/github-production-release-asset/1234/5678\
                  ?X-Amz-Algorithm=AWS4-HMAC-SHA256\
                  &response-content-disposition=attachment%3B%20filename%3DMap_version.txt\
                  &response-content-type=application%2Foctet-stream";
    host.respond_http(signed, "1.0.0").await;

    assert_eq!(updater.outcome(), Some(UpdateOutcome::UpToDate));
    Ok(())
}

#[tokio::test]
async fn debug_mode_traces_transitions_on_console() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let config = UpdaterConfig::builder(DOWNLOAD_PATH, "Map", "Map_version.txt")
        .debug_mode(true)
        .build()?;
    let updater = Updater::new(config, host.clone())?;
    updater.start().await?;
    host.respond_http(updater.version_url(), "1.0.0").await;

    let debug = host.console_at(ConsoleLevel::Debug);
    assert!(debug.iter().any(|line| line.contains("Idle -> CheckingVersion")));
    assert!(debug.iter().any(|line| line.contains("no update")));
    assert!(debug.iter().any(|line| line.contains("-> Done")));
    Ok(())
}

#[tokio::test]
async fn debug_output_is_silent_by_default() -> anyhow::Result<()> {
    let host = MockHost::new("Default").with_package("Map", "1.0.0");
    let updater = updater(&host, "Map");
    updater.start().await?;
    host.respond_http(updater.version_url(), "1.0.0").await;

    assert!(host.console_at(ConsoleLevel::Debug).is_empty());
    assert_eq!(host.console_at(ConsoleLevel::Info).len(), 2);
    Ok(())
}

#[test]
fn missing_package_fails_construction() {
    let host = MockHost::new("Default").with_package("Chat", "1.0.0");
    let err = Updater::new(config("Map"), host).err();
    assert!(matches!(err, Some(UpdaterError::PackageNotFound(name)) if name == "Map"));
}
