//! Exercises the façade's refcounted lifecycle (P1): nested `init`/
//! `shut_down` pairs must compose, and an unmatched `shut_down` must not
//! underflow into a false "initialized" state.
//!
//! Runs against an empty fixture sysfs tree so discovery succeeds with zero
//! devices; `GLOBAL` is process-wide, so this binary's tests that touch
//! `api::init`/`shut_down` are kept in one file to avoid cross-file races
//! under the default parallel test runner.

use std::fs;

use rsmi_core::api::{self, InitFlags};
use rsmi_core::error::RsmiError;

fn with_empty_fixture<R>(f: impl FnOnce() -> R) -> R {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("class/drm")).unwrap();
    // SAFETY: serialized by this module's single #[test] below.
    unsafe { std::env::set_var("RSMI_SYSFS_ROOT", tmp.path()) };
    let result = f();
    unsafe { std::env::remove_var("RSMI_SYSFS_ROOT") };
    result
}

#[test]
fn nested_init_and_shutdown_compose() {
    with_empty_fixture(|| {
        api::init(InitFlags::RESRV_TEST1).unwrap();
        api::init(InitFlags::RESRV_TEST1).unwrap();

        assert_eq!(api::num_monitor_devices().unwrap(), 0);

        api::shut_down().unwrap();
        // Still initialized: the first shut_down only undoes one init.
        assert_eq!(api::num_monitor_devices().unwrap(), 0);

        api::shut_down().unwrap();
        // Fully torn down now; any call should report InitError.
        assert!(matches!(
            api::num_monitor_devices(),
            Err(RsmiError::InitError)
        ));

        assert!(matches!(api::shut_down(), Err(RsmiError::InitError)));
    });
}
