//! Integration tests for `kiln plan`
//!
//! - Tree output marks build and runtime edges
//! - --graph outputs DOT format
//! - --test pulls in test-phase dependencies
//! - --json lists nodes in plan order

mod common;

use common::{exit_code, shell_recipe, stderr, stdout, TestProject};

fn setup_project() -> TestProject {
    let project = TestProject::new();
    project.add_recipe("cmake", &shell_recipe("cmake", &[], "true"));
    project.add_recipe("zstd", &shell_recipe("zstd", &[], "true"));
    project.add_recipe("python", &shell_recipe("python", &[], "true"));
    project.add_recipe(
        "llvm",
        &shell_recipe(
            "llvm",
            &[("cmake", "build"), ("zstd", "runtime"), ("python", "test")],
            "true",
        ),
    );
    project
}

#[test]
fn test_plan_tree_and_order() {
    let project = setup_project();
    let output = project.kiln(&["plan", "llvm"]);

    assert_eq!(exit_code(&output), 0, "stderr: {}", stderr(&output));
    let text = stdout(&output);
    assert!(text.starts_with("llvm@1.0.0\n"));
    assert!(text.contains("├── cmake@1.0.0 [build]"));
    assert!(text.contains("└── zstd@1.0.0 [runtime]"));
    assert!(!text.contains("python"));
    assert!(text.contains("  1. cmake@1.0.0"));
    assert!(text.contains("  3. llvm@1.0.0"));
}

#[test]
fn test_plan_with_tests_includes_test_dependencies() {
    let project = setup_project();
    let output = project.kiln(&["plan", "llvm", "--test"]);

    assert_eq!(exit_code(&output), 0);
    assert!(stdout(&output).contains("python@1.0.0 [test]"));
}

#[test]
fn test_plan_graph_outputs_dot() {
    let project = setup_project();
    let output = project.kiln(&["plan", "llvm", "--graph"]);

    assert_eq!(exit_code(&output), 0);
    let dot = stdout(&output);
    assert!(dot.starts_with("digraph \"llvm\" {"));
    assert!(dot.contains("\"llvm\" -> \"cmake\" [style=solid, label=\"build\"]"));
    assert!(dot.trim_end().ends_with('}'));
}

#[test]
fn test_plan_json_lists_nodes() {
    let project = setup_project();
    let output = project.kiln(&["--json", "plan", "llvm"]);

    assert_eq!(exit_code(&output), 0);
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let ids: Vec<&str> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|n| n["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["cmake", "zstd", "llvm"]);
    assert_eq!(json[2]["dependencies"]["cmake"][0], "build");
}

#[test]
fn test_plan_rejects_mismatched_recipe_file() {
    let project = setup_project();
    project.create_file("recipes/wrong.toml", &shell_recipe("right", &[], "true"));

    let output = project.kiln(&["plan", "llvm"]);

    assert_eq!(exit_code(&output), 2);
    assert!(stderr(&output).contains("declares id 'right'"));
}
