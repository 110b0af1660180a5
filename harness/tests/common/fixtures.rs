//! Test fixtures and data for harness scenarios

use shared::{ActionHandle, ArtifactHandle, BackendAddr, DistSetHandle, ModuleHandle, TargetHandle};

use harness::MockHawkbitBackend;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    pub const BACKEND_HOST: &'static str = "localhost";
    pub const BACKEND_PORT: u16 = 8080;
    pub const SECURITY_TOKEN: &'static str = "2d1fba3a5e5f4a9b8c0d";
    pub const BUNDLE_SIZE: usize = 512 * 1024;
    pub const PROXY_RATE: &'static str = "70k";

    pub fn backend_addr() -> BackendAddr {
        BackendAddr::new(Self::BACKEND_HOST, Self::BACKEND_PORT)
    }

    /// Backend mock that accepts the session settings and every create call
    pub fn accepting_backend() -> MockHawkbitBackend {
        let mut backend = MockHawkbitBackend::new();
        backend.expect_set_config().times(5).returning(|_, _| Ok(()));
        backend.expect_add_target().returning(|name| {
            Ok(TargetHandle {
                name: name.to_string(),
                security_token: Some(Self::SECURITY_TOKEN.to_string()),
            })
        });
        backend.expect_delete_target().returning(|_| Ok(()));
        backend
            .expect_add_software_module()
            .returning(|_, _| Ok(ModuleHandle(1)));
        backend.expect_delete_software_module().returning(|_| Ok(()));
        backend
            .expect_add_artifact()
            .returning(|module, _, _| Ok(ArtifactHandle { id: 2, module }));
        backend.expect_delete_artifact().returning(|_| Ok(()));
        backend
            .expect_add_distribution_set()
            .returning(|_, _, _| Ok(DistSetHandle(3)));
        backend.expect_delete_distribution_set().returning(|_| Ok(()));
        backend.expect_assign_target().returning(|dist, target| {
            Ok(ActionHandle {
                id: 4,
                target: target.to_string(),
                distribution_set: dist,
            })
        });
        backend.expect_cancel_action().returning(|_, _| Ok(()));
        backend
    }
}
