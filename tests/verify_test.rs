//! Integration tests for verification
//!
//! Covers `kiln build --test` (exit 3 on failed assertions) and `kiln test`
//! against an already installed tree.

mod common;

use common::{exit_code, shell_recipe, stderr, stdout, TestProject};

const HELLO_INSTALL: &str = r#"[[install.steps]]
run = ["sh", "-c", '''mkdir -p "$PREFIX/bin" && printf '#!/bin/sh\necho "Hello World"\n' > "$PREFIX/bin/hello" && chmod +x "$PREFIX/bin/hello"''']
"#;

fn hello_recipe(expected: &str) -> String {
    format!(
        r#"[package]
id = "hello"
version = "2.12.1"

[[dependencies]]
id = "checker"
phase = "test"

{HELLO_INSTALL}
[test.fixtures]
"input.txt" = "payload\n"

[[test.assertions]]
name = "greets"
run = ["hello"]
expect = {{ output = "{expected}" }}

[[test.assertions]]
run = ["sh", "-c", "cat input.txt; exit 3"]
expect = {{ exit_code = 3 }}

[[test.assertions]]
run = ["sh", "-c", "echo 'version {{version}}' >&2"]
expect = {{ pattern = "version 2\\.12\\.1" }}
"#
    )
}

fn setup_project(expected: &str) -> TestProject {
    let project = TestProject::new();
    project.add_recipe(
        "checker",
        "[package]\nid = \"checker\"\nversion = \"0.1.0\"\n",
    );
    project.add_recipe("hello", &hello_recipe(expected));
    project
}

#[test]
fn test_build_with_passing_test_exits_0() {
    let project = setup_project("Hello World");
    let output = project.kiln(&["build", "hello", "--test"]);

    assert_eq!(exit_code(&output), 0, "stderr: {}", stderr(&output));
    assert!(project.file_exists("data/cellar/checker/0.1.0"));
    assert!(stdout(&output).contains("hello@2.12.1: all 3 assertion(s) passed"));
}

#[test]
fn test_build_with_failing_test_exits_3_with_diff() {
    let project = setup_project("Hello World!");
    let output = project.kiln(&["build", "hello", "--test"]);

    assert_eq!(exit_code(&output), 3);
    let err = stderr(&output);
    assert!(err.contains("-Hello World!"));
    assert!(err.contains("+Hello World"));
    assert!(err.contains("1 of 3 assertion(s) failed"));
}

#[test]
fn test_build_without_test_flag_skips_test_dependencies() {
    let project = setup_project("Hello World!");
    let output = project.kiln(&["build", "hello"]);

    assert_eq!(exit_code(&output), 0, "stderr: {}", stderr(&output));
    assert!(!project.file_exists("data/cellar/checker"));
}

#[test]
fn test_test_command_against_installed_tree() {
    let project = setup_project("Hello World");
    assert_eq!(exit_code(&project.kiln(&["build", "hello"])), 0);

    let output = project.kiln(&["--json", "test", "hello"]);

    assert_eq!(exit_code(&output), 0, "stderr: {}", stderr(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["recipe"], "hello@2.12.1");
    assert_eq!(report["outcomes"].as_array().unwrap().len(), 3);
    assert_eq!(report["outcomes"][0]["name"], "greets");
    assert_eq!(report["outcomes"][1]["category"], "exit-code");
}

#[test]
fn test_test_command_without_install_fails() {
    let project = setup_project("Hello World");
    let output = project.kiln(&["test", "hello"]);

    assert_eq!(exit_code(&output), 1);
    assert!(stderr(&output).contains("Build the recipe first"));
}

#[test]
fn test_test_command_without_procedure_fails() {
    let project = setup_project("Hello World");
    let output = project.kiln(&["test", "checker"]);

    assert_eq!(exit_code(&output), 1);
    assert!(stderr(&output).contains("has no test procedure"));
}

#[test]
fn test_assertions_see_test_dependency_tools() {
    let project = TestProject::new();
    project.add_recipe(
        "checker",
        &shell_recipe(
            "checker",
            &[],
            r#"mkdir -p "$PREFIX/bin" && printf '#!/bin/sh\necho checked\n' > "$PREFIX/bin/checker-tool" && chmod +x "$PREFIX/bin/checker-tool""#,
        ),
    );
    project.add_recipe(
        "hello",
        r#"[package]
id = "hello"
version = "1.0.0"

[[dependencies]]
id = "checker"
phase = "test"

[[install.steps]]
run = ["sh", "-c", 'mkdir -p "$PREFIX"']

[[test.assertions]]
run = ["checker-tool"]
expect = { output = "checked" }
"#,
    );

    let build = project.kiln(&["build", "hello", "--test"]);
    assert_eq!(exit_code(&build), 0, "stderr: {}", stderr(&build));
    assert!(stdout(&build).contains("hello@1.0.0: all 1 assertion(s) passed"));

    let test = project.kiln(&["test", "hello"]);
    assert_eq!(exit_code(&test), 0, "stderr: {}", stderr(&test));
}
