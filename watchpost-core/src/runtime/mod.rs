use std::path::{Path, PathBuf};

#[cfg(target_os = "macos")]
const ORT_LIBRARY: &str = "libonnxruntime.dylib";
#[cfg(target_os = "windows")]
const ORT_LIBRARY: &str = "onnxruntime.dll";
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const ORT_LIBRARY: &str = "libonnxruntime.so";

/// Resolve and set ORT_DYLIB_PATH before the first session is built.
///
/// Priority order:
/// 1) Existing ORT_DYLIB_PATH (if the file exists)
/// 2) models/onnxruntime*/lib/<library> near the current exe or cwd
/// 3) system library directories
pub fn configure_ort_dylib() -> Option<PathBuf> {
    if let Some(existing) = std::env::var_os("ORT_DYLIB_PATH") {
        let existing_path = PathBuf::from(existing);
        if existing_path.is_file() {
            tracing::info!(path = %existing_path.display(), "using ORT_DYLIB_PATH from environment");
            return Some(existing_path);
        }
        tracing::warn!(
            path = %existing_path.display(),
            "ORT_DYLIB_PATH is set but file does not exist; attempting auto-discovery"
        );
    }

    let found = ort_candidates().into_iter().find(|c| c.is_file());
    match &found {
        Some(candidate) => {
            // SAFETY: called from the single startup thread before any worker
            // thread or ORT session exists.
            unsafe {
                std::env::set_var("ORT_DYLIB_PATH", candidate);
            }
            tracing::info!(path = %candidate.display(), "configured ORT_DYLIB_PATH");
        }
        None => tracing::warn!(
            library = ORT_LIBRARY,
            "could not locate the ONNX Runtime library; set ORT_DYLIB_PATH"
        ),
    }
    found
}

/// Search roots: the working directory, then the executable's directory and
/// up to six of its ancestors.
fn search_roots() -> impl Iterator<Item = PathBuf> {
    let exe_dirs = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .into_iter()
        .flat_map(|dir| dir.ancestors().take(7).map(Path::to_path_buf).collect::<Vec<_>>());
    std::env::current_dir().ok().into_iter().chain(exe_dirs)
}

fn ort_candidates() -> Vec<PathBuf> {
    let bundled = search_roots().flat_map(|root| {
        [
            root.join("models/onnxruntime/lib").join(ORT_LIBRARY),
            root.join("models").join(ORT_LIBRARY),
        ]
    });
    let system = ["/opt/homebrew/lib", "/usr/local/lib", "/usr/lib"]
        .into_iter()
        .map(|dir| Path::new(dir).join(ORT_LIBRARY));
    bundled.chain(system).collect()
}
