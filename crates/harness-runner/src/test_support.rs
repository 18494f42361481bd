//! Fake toolchain scripts for subprocess tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Build step that emits a run configuration the way xcodebuild does
pub const DEFAULT_BUILD: &str = r#"mkdir -p "$out/Build/Products"
touch "$out/Build/Products/maestro-driver-ios_iphoneos17.0-arm64.xctestrun"
echo "** TEST BUILD SUCCEEDED **""#;

/// Run step whose log reaches readiness and then keeps the harness alive
pub const READY_RUN: &str = r#"echo "maestro-driver-ios started, Test Suite 'All tests' passed"
exec sleep 60"#;

/// Write an executable `xcodebuild` stand-in into `dir`.
///
/// `build_body` runs for `build-for-testing`, `run_body` for
/// `test-without-building`; both see the derived-output path as `$out`.
pub fn fake_xcodebuild(dir: &Path, build_body: &str, run_body: &str) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
all="$*"
mode="$1"
out=""
while [ $# -gt 0 ]; do
  if [ "$1" = "-derivedDataPath" ]; then out="$2"; fi
  shift
done
echo "xcodebuild $all"
case "$mode" in
  build-for-testing)
{build_body}
    ;;
  test-without-building)
{run_body}
    ;;
esac
"#
    );

    let path = dir.join("xcodebuild");
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Lay out an installed runner project and return the runner directory
pub fn runner_install(dir: &Path) -> PathBuf {
    let runner_dir = dir.join("runner");
    std::fs::create_dir_all(runner_dir.join("maestro-driver-ios.xcodeproj")).unwrap();
    runner_dir
}
