//! End-to-end harness scenarios
//!
//! The backend is mocked; helper binaries are either scripted stand-ins or,
//! for the proxy, the real `nginx` when it is installed.

mod common;

use futures_util::FutureExt;
use std::time::Duration;

use harness::services::config_composer::{ComposedConfig, OptionOverride, OptionRemoval};
use harness::services::entity_manager::EntityKey;
use harness::services::port_allocator::is_port_bound;
use harness::services::proxy::ProxySettings;
use harness::{HarnessError, ResourceScope};
use shared::RateLimit;

use common::{TestFixtures, TestHelpers};

#[tokio::test]
async fn test_config_references_created_target() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;

    let inner = session.clone();
    let (target, client) = ResourceScope::guarded("scenario A", move |scope| {
        async move {
            let target = inner.entities().target_in(scope).await?;
            let client = inner.client_config(scope, &target).await?;

            let reparsed = ComposedConfig::load(&client.path).await?;
            assert_eq!(reparsed, client.config);
            assert_eq!(reparsed.get("client", "target_name"), Some(target.name.as_str()));
            assert_eq!(reparsed.get("client", "auth_token"), Some(TestFixtures::SECURITY_TOKEN));
            assert_eq!(reparsed.get("client", "hawkbit_server"), Some("localhost:8080"));
            assert_eq!(
                reparsed.get("client", "bundle_download_location"),
                client.bundle_location.to_str()
            );
            assert!(client.bundle_location.exists());
            Ok((target, client))
        }
        .boxed()
    })
    .await
    .unwrap();

    assert!(!client.path.exists());
    assert!(!client.bundle_location.exists());
    assert!(!session.entities().is_live(&EntityKey::Target(target.name)).await);
}

#[tokio::test]
async fn test_keep_configs_keeps_only_the_config() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::keeping_session(dir.path(), TestFixtures::accepting_backend()).await;
    let mut scope = ResourceScope::new("keep configs");

    let target = session.entities().target_in(&mut scope).await.unwrap();
    let client = session.client_config(&mut scope, &target).await.unwrap();
    let bundle = session.dummy_bundle(&mut scope, 1024).await.unwrap();

    scope.close().await.unwrap();
    assert!(client.path.exists());
    assert!(!client.bundle_location.exists());
    assert!(!bundle.exists());
}

#[tokio::test]
async fn test_adjusted_config_is_a_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;
    let mut scope = ResourceScope::new("adjust");

    let target = session.entities().target_in(&mut scope).await.unwrap();
    let client = session.client_config(&mut scope, &target).await.unwrap();

    let (adjusted, path) = session
        .adjusted_config(
            &mut scope,
            &client.config,
            &[OptionOverride::new("client", "hawkbit_server", "localhost:1")],
            &[OptionRemoval::new("client", "ssl_verify")],
        )
        .await
        .unwrap();
    assert_ne!(path, client.path);
    assert_eq!(ComposedConfig::load(&path).await.unwrap(), adjusted);
    assert_eq!(adjusted.get("client", "ssl_verify"), None);

    // The original file is untouched
    let original = ComposedConfig::load(&client.path).await.unwrap();
    assert_eq!(original.get("client", "hawkbit_server"), Some("localhost:8080"));

    let err = session
        .adjusted_config(&mut scope, &client.config, &[], &[OptionRemoval::new("client", "nope")])
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::KeyNotFound { .. }));

    scope.close().await.unwrap();
    assert!(!path.exists());
}

#[tokio::test]
async fn test_entities_torn_down_even_when_body_fails() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;

    let inner = session.clone();
    let result: harness::HarnessResult<()> = ResourceScope::guarded("failing body", move |scope| {
        async move {
            let entities = inner.entities();
            let target = entities.target_in(scope).await?;
            let module = entities.software_module_in(scope).await?;
            entities.artifact_in(scope, vec![0; 64], module).await?;
            let dist = entities.distribution_set_in(scope, module).await?;
            entities.assignment_in(scope, dist, &target).await?;
            Err(HarnessError::unavailable("update client", "not built"))
        }
        .boxed()
    })
    .await;

    assert!(result.unwrap_err().skip_reason().is_some());
    assert_eq!(session.entities().live_count().await, 0);
}

#[tokio::test]
async fn test_install_service_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;
    let fake = TestHelpers::write_script(
        &dir.path().join("build"),
        "rauc-dbus-dummy",
        "echo \"serving $1 $2\"\necho 'Interface published'\nexec sleep 30",
    );
    let mut scope = ResourceScope::new("scenario B");

    let bundle = session
        .dummy_bundle(&mut scope, TestFixtures::BUNDLE_SIZE)
        .await
        .unwrap();
    assert_eq!(std::fs::metadata(&bundle).unwrap().len(), TestFixtures::BUNDLE_SIZE as u64);

    let spec = session.install_service(&bundle).binary(&fake).completion_code(1);
    let service = TestHelpers::skip_if_unavailable("scenario B", spec.start(&mut scope).await);
    let Some(service) = service else {
        scope.close().await.unwrap();
        return;
    };

    assert!(service.is_ready());
    assert!(service.is_alive());
    let output = service.output().await;
    assert!(output.contains(bundle.to_str().unwrap()));
    assert!(output.contains("--completed-code=1"));

    service.terminate(false).await.unwrap();
    assert!(service.wait_for_exit(Duration::from_secs(5)).await);
    assert!(!service.is_alive());

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_install_service_without_marker_times_out() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;
    let fake = TestHelpers::write_script(&dir.path().join("build"), "mute-dummy", "exec sleep 30");
    let mut scope = ResourceScope::new("mute");

    let err = session
        .install_service(dir.path().join("bundle.raucb"))
        .binary(&fake)
        .ready_timeout(Duration::from_millis(200))
        .start(&mut scope)
        .await
        .unwrap_err();
    assert!(matches!(err, HarnessError::ReadinessTimeout { .. }));

    scope.close().await.unwrap();
}

#[tokio::test]
async fn test_rate_limited_proxy() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend())
        .await
        .with_proxy_settings(
            ProxySettings::new(TestFixtures::backend_addr()).signature_timeout(Duration::from_secs(20)),
        );
    let rate: RateLimit = TestFixtures::PROXY_RATE.parse().unwrap();
    let mut scope = ResourceScope::new("scenario C");

    let started = session.proxies().start_proxy(&mut scope, rate).await;
    let Some(proxy) = TestHelpers::skip_if_unavailable("scenario C", started) else {
        scope.close().await.unwrap();
        return;
    };

    assert_ne!(proxy.port, TestFixtures::BACKEND_PORT);
    assert_eq!(proxy.rate, rate);
    assert!(is_port_bound(proxy.port).await);

    scope.close().await.unwrap();
    assert!(!is_port_bound(proxy.port).await);
}

#[tokio::test]
async fn test_client_command_uses_persisted_config() {
    let dir = tempfile::tempdir().unwrap();
    let session = TestHelpers::mock_session(dir.path(), TestFixtures::accepting_backend()).await;

    let command = session.client_command(&dir.path().join("client.conf"));
    assert_eq!(command.program, "rauc-hawkbit-updater");
    assert_eq!(command.args[0], "-c");
    assert!(command.args[1].ends_with("client.conf"));
    assert!(command.env.iter().any(|(k, v)| k == "DBUS_STARTER_BUS_TYPE" && v == "session"));
}
