use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use jsonschema::JSONSchema;
use serde_json::Value;

const SEEDED_SUBMISSION_ID: &str = "01J9Z5Y6M3K4N8P2Q7R1S0T5VW";

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn fixture_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/bundle.json")
}

/// Copy the fixture bundle into a fresh sandbox so runs never mutate it.
fn seeded_store(prefix: &str) -> (PathBuf, PathBuf) {
    let sandbox = unique_temp_dir(prefix);
    let store = sandbox.join("store.json");
    fs::copy(fixture_path(), &store)
        .unwrap_or_else(|err| panic!("failed to seed store {}: {err}", store.display()));
    (sandbox, store)
}

fn run_cli<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_assessment-detail"))
        .args(args)
        .env_remove("ASSESSMENT_STORE")
        .env_remove("ASSESSMENT_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute assessment-detail binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "assessment-detail command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    parse_stdout(&run_cli(args))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn repo_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../..")
        .canonicalize()
        .unwrap_or_else(|err| panic!("failed to canonicalize repo root: {err}"))
}

fn read_json_file(path: &Path) -> Value {
    let body = fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read JSON file {}: {err}", path.display()));
    serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse JSON file {}: {err}", path.display()))
}

fn validate_schema(schema_file: &str, instance: &Value) {
    let schema_path = repo_root().join("contracts/v1/schemas").join(schema_file);
    let schema_json = read_json_file(&schema_path);
    let compiled = JSONSchema::compile(&schema_json)
        .unwrap_or_else(|err| panic!("failed to compile schema {}: {err}", schema_path.display()));

    let errors = compiled
        .validate(instance)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>());
    if let Some(errors) = errors {
        panic!("schema validation failed for {}:\n{}", schema_file, errors.join("\n"));
    }
}

fn ids(values: &Value) -> Vec<&str> {
    values
        .as_array()
        .unwrap_or_else(|| panic!("expected an array: {values}"))
        .iter()
        .map(|value| as_str(value, "id"))
        .collect()
}

fn detail_for(store: &Path, entity_id: &str) -> Value {
    run_json([
        "--store",
        path_str(store),
        "detail",
        "--framework-id",
        "F1",
        "--entity-id",
        entity_id,
    ])
}

// Test IDs: TCLI-001
#[test]
fn cli_outputs_validate_against_versioned_schemas() {
    let (sandbox, store) = seeded_store("assessment-contract-schemas");

    let detail = detail_for(&store, "school-1");
    validate_schema("detail.response.schema.json", &detail);

    let flattened = run_json(["--store", path_str(&store), "flatten", "--framework-id", "F1"]);
    validate_schema("flatten.response.schema.json", &flattened);

    let weighted =
        run_json(["--store", path_str(&store), "flatten", "--framework-id", "F1", "--weighted"]);
    validate_schema("flatten.response.schema.json", &weighted);

    let lint = run_json(["--store", path_str(&store), "lint", "--framework-id", "F1"]);
    validate_schema("lint.response.schema.json", &lint);

    let shown = run_json([
        "--store",
        path_str(&store),
        "submission",
        "show",
        "--submission-id",
        SEEDED_SUBMISSION_ID,
    ]);
    validate_schema("submission.response.schema.json", &shown);

    let stats = run_json(["--store", path_str(&store), "store", "stats"]);
    validate_schema("store-stats.response.schema.json", &stats);

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-002
#[test]
fn cli_detail_merges_evidences_and_nests_matrix_instances() {
    let (sandbox, store) = seeded_store("assessment-detail-merge");

    let output = detail_for(&store, "school-1");
    assert_eq!(as_str(&output, "contract_version"), "cli.v1");
    let detail = &output["detail"];
    assert_eq!(as_str(detail, "externalId"), "SCHOOL-SAFETY-2019");
    assert_eq!(as_str(detail, "submissionId"), SEEDED_SUBMISSION_ID);

    let names = detail["evidences"]
        .as_array()
        .unwrap_or_else(|| panic!("evidences should be an array: {detail}"))
        .iter()
        .map(|evidence| as_str(evidence, "name"))
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["Document Review", "Interview", "Observation"]);

    let observation = &detail["evidences"][2];
    assert_eq!(as_str(observation, "externalId"), "EV1");
    assert_eq!(as_str(&observation["sections"][0], "name"), "Observation");
    assert_eq!(ids(&observation["sections"][0]["questions"]), vec!["Q1", "Q2", "QM", "Q6"]);
    assert_eq!(as_str(&observation["sections"][1], "name"), "Interview Notes");
    assert_eq!(ids(&observation["sections"][1]["questions"]), Vec::<&str>::new());

    let matrix = &observation["sections"][0]["questions"][2];
    assert_eq!(ids(&matrix["instanceQuestions"]), vec!["Q3", "Q4"]);
    let moved = &matrix["instanceQuestions"][1]["payload"];
    assert_eq!(as_str(moved, "criteriaId"), "C2");
    assert_eq!(as_str(moved, "evidenceMethod"), "EV1");

    let document_review = &detail["evidences"][0];
    assert_eq!(document_review["notApplicable"], Value::Bool(false));
    assert_eq!(as_str(document_review, "remarks"), "");

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-003
#[test]
fn cli_detail_annotates_progress_from_existing_submission() {
    let (sandbox, store) = seeded_store("assessment-detail-annotate");

    let output = detail_for(&store, "school-1");
    let detail = &output["detail"];
    let observation = &detail["evidences"][2];
    assert_eq!(observation["isSubmitted"], Value::Bool(true));
    assert_eq!(as_str(observation, "startTime"), "2019-06-02T09:00:00Z");
    assert_eq!(as_str(observation, "endTime"), "2019-06-02T11:30:00Z");
    assert_eq!(as_str(&detail["submissions"]["EV1"], "label"), "second visit");

    let interview = &detail["evidences"][1];
    assert_eq!(interview["isSubmitted"], Value::Bool(false));
    assert!(interview.get("startTime").is_none());
    assert!(detail["submissions"].get("EV3").is_none());

    let shown = run_json([
        "--store",
        path_str(&store),
        "submission",
        "show",
        "--submission-id",
        SEEDED_SUBMISSION_ID,
    ]);
    let tracked = shown["evidences"]
        .as_object()
        .unwrap_or_else(|| panic!("evidences should be an object: {shown}"))
        .keys()
        .cloned()
        .collect::<Vec<_>>();
    assert_eq!(tracked, vec!["EV1".to_string(), "EV2".to_string(), "EV3".to_string()]);

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-004
#[test]
fn cli_detail_creates_and_reuses_submission_for_new_entity() {
    let (sandbox, store) = seeded_store("assessment-detail-create");

    let first = detail_for(&store, "school-2");
    let second = detail_for(&store, "school-2");
    let submission_id = as_str(&first["detail"], "submissionId");
    assert_ne!(submission_id, SEEDED_SUBMISSION_ID);
    assert_eq!(submission_id, as_str(&second["detail"], "submissionId"));
    assert_eq!(as_str(&first, "digest"), as_str(&second, "digest"));

    let stats = run_json(["--store", path_str(&store), "store", "stats"]);
    assert_eq!(stats["submissions"], Value::from(2));

    let created = run_json([
        "--store",
        path_str(&store),
        "submission",
        "show",
        "--submission-id",
        submission_id,
    ]);
    assert_eq!(as_str(&created, "entityId"), "school-2");
    assert_eq!(created["evidencesStatus"].as_array().map(Vec::len), Some(3));
    let criteria = &created["criteria"][0];
    assert_eq!(as_str(criteria, "name"), "Building safety");
    assert!(criteria.get("resourceType").is_none());
    assert!(criteria.get("evidences").is_none());

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-005
#[test]
fn cli_flatten_and_lint_report_theme_tree() {
    let (sandbox, store) = seeded_store("assessment-flatten-lint");

    let flattened = run_json(["--store", path_str(&store), "flatten", "--framework-id", "F1"]);
    assert_eq!(flattened["criteria"], serde_json::json!(["C1", "C2", "C3"]));

    let weighted = run_json([
        "--store",
        path_str(&store),
        "flatten",
        "--framework-id",
        "SCHOOL-SAFETY-2019",
        "--weighted",
    ]);
    assert_eq!(
        weighted["criteria"],
        serde_json::json!([
            { "criteriaId": "C1", "weightage": 60 },
            { "criteriaId": "C2", "weightage": "40" },
            { "criteriaId": "C3" }
        ])
    );

    let lint = run_json(["--store", path_str(&store), "lint", "--framework-id", "F1"]);
    assert_eq!(lint["clean"], Value::Bool(false));
    let issues = lint["issues"]
        .as_array()
        .unwrap_or_else(|| panic!("issues should be an array: {lint}"));
    assert_eq!(issues.len(), 1);
    assert!(issues[0].as_str().is_some_and(|issue| issue.contains("Draft")));

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-006
#[test]
fn cli_unknown_framework_fails_without_touching_store() {
    let (sandbox, store) = seeded_store("assessment-not-found");
    let before = fs::read(&store).unwrap_or_else(|err| panic!("failed to read store: {err}"));

    let output = run_cli([
        "--store",
        path_str(&store),
        "detail",
        "--framework-id",
        "missing",
        "--entity-id",
        "school-1",
    ]);
    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("not found: framework missing"), "stderr: {stderr}");

    let after = fs::read(&store).unwrap_or_else(|err| panic!("failed to read store: {err}"));
    assert_eq!(before, after);

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-007
#[test]
fn cli_reads_store_and_log_level_from_environment() {
    let (sandbox, store) = seeded_store("assessment-env-config");

    let output = Command::new(env!("CARGO_BIN_EXE_assessment-detail"))
        .args(["store", "stats"])
        .env("ASSESSMENT_STORE", &store)
        .env("ASSESSMENT_LOG", "debug")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute assessment-detail binary: {err}"));
    let stats = parse_stdout(&output);
    assert_eq!(stats["frameworks"], Value::from(1));
    assert_eq!(stats["criteria"], Value::from(3));

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("opening document store"), "stderr: {stderr}");

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-008
#[test]
fn cli_missing_store_file_reads_as_empty() {
    let sandbox = unique_temp_dir("assessment-empty-store");
    let store = sandbox.join("absent.json");

    let stats = run_json(["--store", path_str(&store), "store", "stats"]);
    assert_eq!(stats["frameworks"], Value::from(0));
    assert!(!store.exists());

    let _ = fs::remove_dir_all(&sandbox);
}

// Test IDs: TCLI-009
#[test]
fn cli_detail_rewrites_only_submissions() {
    let (sandbox, store) = seeded_store("assessment-verbatim");
    let before = read_json_file(&store);

    let _ = detail_for(&store, "school-2");
    let after = read_json_file(&store);
    assert_eq!(after["frameworks"], before["frameworks"]);
    assert_eq!(after["criteria"], before["criteria"]);
    assert_eq!(after["submissions"][0], before["submissions"][0]);
    assert_eq!(after["frameworks"][0]["entityType"], Value::from("school"));
    assert_eq!(after["frameworks"][0]["themes"][0]["weightage"], Value::from(70));

    let _ = fs::remove_dir_all(&sandbox);
}
