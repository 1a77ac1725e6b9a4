use std::path::{Component, Path, PathBuf};

/// Relative path from `base` to `path`, both assumed absolute.
///
/// Unlike `Path::strip_prefix` this handles siblings by emitting `..`
/// components. The external tool mangles absolute paths, so everything it
/// receives must be expressed relative to its working directory even when
/// the file lives next to (not under) it.
pub fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let path_comps: Vec<Component<'_>> = path.components().collect();
    let base_comps: Vec<Component<'_>> = base.components().collect();
    let common = path_comps
        .iter()
        .zip(base_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base_comps.len() {
        out.push("..");
    }
    for comp in &path_comps[common..] {
        out.push(comp.as_os_str());
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// `shutil.which` equivalent: a bare name is searched on PATH, anything
/// with a separator is checked directly.
pub fn tool_available(cmd: &str) -> bool {
    let as_path = Path::new(cmd);
    if as_path.components().count() > 1 {
        return as_path.is_file();
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(cmd).is_file())
}

#[cfg(test)]
mod tests {
    use super::relative_to;
    use std::path::Path;

    #[test]
    fn descendant_stays_plain() {
        let rel = relative_to(Path::new("/data/out/ts_1.mrc"), Path::new("/data/out"));
        assert_eq!(rel, Path::new("ts_1.mrc"));
    }

    #[test]
    fn sibling_gets_parent_components() {
        let rel = relative_to(Path::new("/data/imod/ts_1/ts_1.st"), Path::new("/data/out"));
        assert_eq!(rel, Path::new("../imod/ts_1/ts_1.st"));
    }

    #[test]
    fn same_directory_is_dot() {
        let rel = relative_to(Path::new("/data/out"), Path::new("/data/out"));
        assert_eq!(rel, Path::new("."));
    }

    #[test]
    fn deeper_base_walks_up() {
        let rel = relative_to(Path::new("/data/a.mrc"), Path::new("/data/out/even"));
        assert_eq!(rel, Path::new("../../a.mrc"));
    }
}
