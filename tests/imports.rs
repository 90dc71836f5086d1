//! Import resolution scenarios on a real filesystem.

use std::fs;
use std::path::PathBuf;

use protoparse::{DependencyResolver, Error, ResolveError, ResolverConfig};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn import_resolution_orders_files_topologically() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("base.proto"),
        "syntax = \"proto3\";\npackage test.base;\nmessage Base {}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("user.proto"),
        "syntax = \"proto3\";\nimport \"base.proto\";\npackage test.user;\n",
    )
    .unwrap();

    let resolver = DependencyResolver::new([dir.path()]);
    let resolution = resolver.resolve(&dir.path().join("user.proto")).unwrap();

    assert_eq!(resolution.ordered.len(), 2);
    assert!(resolution.warnings.is_empty());
    let order: Vec<_> = resolution
        .ordered
        .iter()
        .map(|f| f.import_path.clone())
        .collect();
    assert_eq!(order, vec!["base.proto", "user.proto"]);
}

/// The topological order places every file strictly after all of its
/// transitive dependencies and is a permutation of the resolved set.
#[test]
fn topological_order_is_a_valid_permutation() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.proto"), "syntax = \"proto3\";\n").unwrap();
    fs::write(
        dir.path().join("b.proto"),
        "syntax = \"proto3\";\nimport \"a.proto\";\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("c.proto"),
        "syntax = \"proto3\";\nimport \"a.proto\";\nimport \"b.proto\";\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("d.proto"),
        "syntax = \"proto3\";\nimport \"b.proto\";\nimport \"c.proto\";\n",
    )
    .unwrap();

    let resolver = DependencyResolver::new([dir.path()]);
    let resolution = resolver.resolve(&dir.path().join("d.proto")).unwrap();

    let order: Vec<_> = resolution
        .ordered
        .iter()
        .map(|f| f.import_path.clone())
        .collect();
    assert_eq!(order.len(), 4);

    let position = |name: &str| order.iter().position(|p| p == name).unwrap();
    for (file, dependency) in [
        ("b.proto", "a.proto"),
        ("c.proto", "a.proto"),
        ("c.proto", "b.proto"),
        ("d.proto", "b.proto"),
        ("d.proto", "c.proto"),
    ] {
        assert!(
            position(dependency) < position(file),
            "{dependency} must precede {file} in {order:?}"
        );
    }
}

#[test]
fn circular_imports_fail_with_the_cycle_chain() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("a.proto"),
        "syntax = \"proto3\";\nimport \"b.proto\";\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("b.proto"),
        "syntax = \"proto3\";\nimport \"a.proto\";\n",
    )
    .unwrap();

    let resolver = DependencyResolver::new([dir.path()]);
    match resolver.resolve(&dir.path().join("a.proto")) {
        Err(ResolveError::CircularDependency { chain }) => {
            assert_eq!(chain.first(), chain.last());
            assert!(chain.contains(&"a.proto".to_owned()));
            assert!(chain.contains(&"b.proto".to_owned()));
        }
        other => panic!("expected CircularDependency, got {other:?}"),
    }
}

#[test]
fn first_matching_root_wins() {
    init_logging();
    let primary = tempfile::tempdir().unwrap();
    let fallback = tempfile::tempdir().unwrap();
    fs::write(
        primary.path().join("shared.proto"),
        "syntax = \"proto3\";\npackage primary;\n",
    )
    .unwrap();
    fs::write(
        fallback.path().join("shared.proto"),
        "syntax = \"proto3\";\npackage fallback;\n",
    )
    .unwrap();
    fs::write(
        primary.path().join("entry.proto"),
        "syntax = \"proto3\";\nimport \"shared.proto\";\n",
    )
    .unwrap();

    let resolver = DependencyResolver::new([primary.path(), fallback.path()]);
    let resolution = resolver.resolve(&primary.path().join("entry.proto")).unwrap();
    let shared = resolution
        .ordered
        .iter()
        .find(|f| f.import_path == "shared.proto")
        .unwrap();
    assert_eq!(shared.package.as_deref(), Some("primary"));
}

#[test]
fn missing_imports_can_degrade_to_warnings() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("entry.proto"),
        "syntax = \"proto3\";\nimport \"not_there.proto\";\nmessage M {}\n",
    )
    .unwrap();

    let err = protoparse::parse_file_with_imports(
        dir.path().join("entry.proto"),
        &[dir.path().to_owned()],
        false,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Resolve(ResolveError::ImportNotFound { .. })
    ));

    let file = protoparse::parse_file_with_imports(
        dir.path().join("entry.proto"),
        &[dir.path().to_owned()],
        true,
    )
    .unwrap();
    assert_eq!(file.messages[0].name, "M");
}

#[test]
fn weak_imports_still_require_resolution() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("entry.proto"),
        "syntax = \"proto3\";\nimport weak \"gone.proto\";\n",
    )
    .unwrap();

    // `weak` by itself does not suppress resolution failures.
    let err = protoparse::parse_file_with_imports(
        dir.path().join("entry.proto"),
        &[dir.path().to_owned()],
        false,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Resolve(ResolveError::ImportNotFound { .. })
    ));
}

#[test]
fn non_recursive_resolution_stops_at_direct_imports() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("deep.proto"), "syntax = \"proto3\";\n").unwrap();
    fs::write(
        dir.path().join("mid.proto"),
        "syntax = \"proto3\";\nimport \"deep.proto\";\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("top.proto"),
        "syntax = \"proto3\";\nimport \"mid.proto\";\n",
    )
    .unwrap();

    let resolver = DependencyResolver::with_config(
        [dir.path()],
        ResolverConfig {
            recursive: false,
            ..ResolverConfig::default()
        },
    );
    let resolution = resolver.resolve(&dir.path().join("top.proto")).unwrap();
    let names: Vec<_> = resolution
        .ordered
        .iter()
        .map(|f| f.import_path.clone())
        .collect();
    assert!(names.contains(&"top.proto".to_owned()));
    assert!(names.contains(&"mid.proto".to_owned()));
    assert!(!names.contains(&"deep.proto".to_owned()));
}

#[test]
fn nonexistent_entry_file() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let resolver = DependencyResolver::new([dir.path()]);
    assert!(matches!(
        resolver.resolve(&dir.path().join("ghost.proto")),
        Err(ResolveError::FileNotFound(_))
    ));
}

#[test]
fn import_roots_must_exist() {
    init_logging();
    let err = protoparse::parse_file_with_imports(
        "irrelevant.proto",
        &[PathBuf::from("/no/such/root")],
        false,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::Resolve(ResolveError::DirectoryNotFound(_))
    ));
}
