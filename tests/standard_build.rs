//! The standard build definition: default keys, cleaning, project
//! aggregation and cycle detection, and the assembly operation driven
//! through the key graph.

use kiln::core::KilnError;
use kiln::keys::standard::{
    self, BuildOptions, ASSEMBLY, CLEAN, EXTERNAL_CLASSPATH, INTERNAL_CLASSPATH, PROJECT_DEPENDENCIES,
    PROJECT_NAME, RUN_OPTIONS,
};
use kiln::keys::Evaluator;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn options(root: &Path) -> BuildOptions {
    BuildOptions {
        root: root.to_path_buf(),
        offline: true,
        local_repository: None,
    }
}

#[test]
fn test_default_build_names_project_after_root() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("demoapp");
    fs::create_dir_all(&root).unwrap();

    let build = standard::default_build(&options(&root)).unwrap();
    let evaluator = Evaluator::new(build);
    let scope = evaluator.project_scope_by_name("demoapp").unwrap();
    assert_eq!(evaluator.evaluate(scope, &PROJECT_NAME).unwrap(), "demoapp");
}

#[test]
fn test_clean_removes_only_deletable_entries() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    let cache = root.join("build/cache");
    fs::create_dir_all(cache.join("-scratch")).unwrap();
    fs::write(cache.join("-stale.bin"), b"x").unwrap();
    fs::write(cache.join("keep.bin"), b"x").unwrap();

    let build = standard::default_build(&options(&root)).unwrap();
    let evaluator = Evaluator::new(build);
    let scope = evaluator.project_scope_by_name("proj").unwrap();

    assert_eq!(evaluator.evaluate(scope, &CLEAN).unwrap(), 2);
    assert!(!cache.join("-scratch").exists());
    assert!(!cache.join("-stale.bin").exists());
    assert!(cache.join("keep.bin").exists());

    // A second clean finds nothing left to delete.
    assert_eq!(evaluator.evaluate(scope, &CLEAN).unwrap(), 0);
}

#[test]
fn test_run_options_pick_up_debug_port() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    fs::create_dir_all(&root).unwrap();
    let build = standard::default_build(&options(&root)).unwrap();
    let evaluator = Evaluator::new(build);
    let scope = evaluator.project_scope_by_name("proj").unwrap();

    std::env::set_var("KILN_RUN_DEBUG_PORT", "5005");
    let with_debug = evaluator.evaluate(scope, &RUN_OPTIONS).unwrap();
    std::env::remove_var("KILN_RUN_DEBUG_PORT");
    let without_debug = evaluator.evaluate(scope, &RUN_OPTIONS).unwrap();

    assert!(with_debug
        .iter()
        .any(|option| option.contains("jdwp") && option.contains("5005")));
    assert!(!without_debug.iter().any(|option| option.contains("jdwp")));
}

#[test]
fn test_project_dependency_aggregation() {
    let temp = TempDir::new().unwrap();
    let shared_out = temp.path().join("shared/classes");
    fs::create_dir_all(&shared_out).unwrap();

    let mut standard = standard::standard_build(&options(temp.path())).unwrap();
    let jvm_base = standard.jvm_base;
    let shared_classes = shared_out.clone();
    standard
        .build
        .project("shared", None, &[jvm_base], |p| {
            p.set_value(&PROJECT_NAME, "shared".to_string());
            p.set_value(&INTERNAL_CLASSPATH, vec![shared_classes.clone()]);
        })
        .unwrap();
    standard
        .build
        .project("app", None, &[jvm_base], |p| {
            p.set_value(&PROJECT_NAME, "app".to_string());
            p.set_value(&PROJECT_DEPENDENCIES, vec!["shared".to_string()]);
        })
        .unwrap();

    let evaluator = Evaluator::new(standard.build);
    let scope = evaluator.project_scope_by_name("app").unwrap();
    let classpath = evaluator.evaluate(scope, &EXTERNAL_CLASSPATH).unwrap();
    assert_eq!(classpath, vec![shared_out]);
}

#[test]
fn test_cyclic_project_dependency_is_fatal() {
    let temp = TempDir::new().unwrap();
    let mut standard = standard::standard_build(&options(temp.path())).unwrap();
    let jvm_base = standard.jvm_base;
    standard
        .build
        .project("a", None, &[jvm_base], |p| {
            p.set_value(&PROJECT_NAME, "a".to_string());
            p.set_value(&PROJECT_DEPENDENCIES, vec!["b".to_string()]);
        })
        .unwrap();
    standard
        .build
        .project("b", None, &[jvm_base], |p| {
            p.set_value(&PROJECT_NAME, "b".to_string());
            p.set_value(&PROJECT_DEPENDENCIES, vec!["a".to_string()]);
        })
        .unwrap();

    let evaluator = Evaluator::new(standard.build);
    let scope = evaluator.project_scope_by_name("a").unwrap();
    let error = evaluator.evaluate(scope, &EXTERNAL_CLASSPATH).unwrap_err();
    match error.downcast_ref::<KilnError>() {
        Some(KilnError::CyclicProjectDependency { chain }) => {
            assert!(chain.contains("a -> b -> a"), "unexpected chain: {chain}");
        }
        other => panic!("expected a cycle error, got {other:?}"),
    }
}

#[test]
fn test_assembly_operation_through_keys() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("proj");
    let classes = root.join("out/classes");
    fs::create_dir_all(classes.join("com/example")).unwrap();
    fs::write(classes.join("com/example/Main.class"), b"bytecode").unwrap();

    let mut standard = standard::standard_build(&options(&root)).unwrap();
    let jvm_base = standard.jvm_base;
    let internal = classes.clone();
    standard
        .build
        .project("proj", Some(root.clone()), &[jvm_base], |p| {
            p.set_value(&PROJECT_NAME, "proj".to_string());
            p.set_value(&INTERNAL_CLASSPATH, vec![internal.clone()]);
        })
        .unwrap();

    let evaluator = Evaluator::new(standard.build);
    let scope = evaluator.project_scope_by_name("proj").unwrap();
    let archive_path = evaluator.evaluate(scope, &ASSEMBLY).unwrap();

    assert_eq!(
        archive_path,
        root.join("build/artifacts/proj-assembly.jar")
    );
    let mut archive =
        zip::ZipArchive::new(fs::File::open(&archive_path).unwrap()).unwrap();
    let mut entry = archive.by_name("com/example/Main.class").unwrap();
    let mut bytes = Vec::new();
    std::io::Read::read_to_end(&mut entry, &mut bytes).unwrap();
    assert_eq!(bytes, b"bytecode");
}
