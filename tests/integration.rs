use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const POLICY: &str = "Vacation policy: employees accrue 1.5 days per month.";

fn cqa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("cqa");
    path
}

fn write_config(root: &Path, dims: usize) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/cqa.sqlite"

[chunking]
size = 40
overlap = 10

[embedding]
provider = "hash"
dims = {dims}

[generation]
provider = "disabled"

[templates.general]
body = "Context:\n{{context}}\n\nQuestion: {{question}}\nAnswer: "

[templates.technical]
body = "List the skills.\n{{context}}\nQ: {{question}}"

[presets]
"Vacation" = "How many vacation days per month?"
"#,
        root = root.display(),
        dims = dims,
    );

    let config_path = config_dir.join("cqa.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("notes")).unwrap();
    fs::write(files_dir.join("policy.txt"), POLICY).unwrap();
    fs::write(
        files_dir.join("alice.md"),
        "# Alice\n\nRust engineer.\n\nBuilt SQLite tooling.",
    )
    .unwrap();
    fs::write(
        files_dir.join("notes/bob.txt"),
        "Bob manages Kubernetes clusters.",
    )
    .unwrap();
    fs::write(files_dir.join("photo.png"), [0u8, 1, 2, 3]).unwrap();

    let config_path = write_config(&root, 512);
    (tmp, config_path)
}

fn files_dir(config_path: &Path) -> PathBuf {
    config_path.parent().unwrap().parent().unwrap().join("files")
}

fn run_cqa(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = cqa_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run cqa binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_all(config_path: &Path) -> String {
    let dir = files_dir(config_path);
    let (stdout, stderr, success) = run_cqa(config_path, &["ingest", dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    stdout
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cqa(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/cqa.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_cqa(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_cqa(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_invalid_config_fails_fast() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(
        &config_path,
        "[db]\npath = \"x.sqlite\"\n\n[chunking]\nsize = 100\noverlap = 100\n",
    )
    .unwrap();

    let (_, stderr, success) = run_cqa(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("overlap"), "stderr={}", stderr);
}

#[test]
fn test_ingest_directory() {
    let (_tmp, config_path) = setup_test_env();

    let stdout = ingest_all(&config_path);
    assert!(stdout.contains("ingested: 3"), "stdout={}", stdout);
    assert!(stdout.contains("failed: 0"));
    assert!(stdout.contains("notes/bob.txt"));
    assert!(!stdout.contains("photo.png"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_many_files_in_parallel() {
    let (tmp, config_path) = setup_test_env();
    let bulk = tmp.path().join("bulk");
    fs::create_dir_all(&bulk).unwrap();
    for i in 0..40 {
        fs::write(
            bulk.join(format!("note-{:02}.txt", i)),
            format!("Meeting note {} covers budget item {} and owner {}.", i, i * 7, i % 5),
        )
        .unwrap();
    }

    let (stdout, stderr, success) = run_cqa(&config_path, &["ingest", bulk.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested: 40"), "stdout={}", stdout);
    assert!(stdout.contains("failed: 0"));
    assert!(!stderr.contains("database is locked"), "stderr={}", stderr);

    let (stdout, _, _) = run_cqa(&config_path, &["list"]);
    assert!(stdout.contains("40 document(s)"));
}

#[test]
fn test_ingest_text_with_blank_gap() {
    let (tmp, config_path) = setup_test_env();
    let gap = tmp.path().join("pages.txt");
    fs::write(
        &gap,
        format!("First page text here.{}Second page text here.", "\n".repeat(120)),
    )
    .unwrap();

    let (stdout, stderr, success) = run_cqa(&config_path, &["ingest", gap.to_str().unwrap()]);
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested pages.txt"), "stdout={}", stdout);

    let (stdout, _, success) = run_cqa(
        &config_path,
        &["query", "Second page text", "--k", "1", "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("Second page text here."), "stdout={}", stdout);
}

#[test]
fn test_reingest_unchanged_is_skipped() {
    let (_tmp, config_path) = setup_test_env();

    ingest_all(&config_path);
    let stdout = ingest_all(&config_path);
    assert!(stdout.contains("unchanged: 3"), "stdout={}", stdout);
    assert!(stdout.contains("ingested: 0"));

    let dir = files_dir(&config_path);
    let (stdout, _, success) =
        run_cqa(&config_path, &["ingest", dir.to_str().unwrap(), "--force"]);
    assert!(success);
    assert!(stdout.contains("ingested: 3"), "stdout={}", stdout);
    assert!(stdout.contains("replaced policy.txt"));
}

#[test]
fn test_ingest_single_file_with_id_and_kind() {
    let (_tmp, config_path) = setup_test_env();
    let notes = files_dir(&config_path).join("notes.log");
    fs::write(&notes, "Standup notes: Carol owns the release.").unwrap();

    let (stdout, stderr, success) = run_cqa(
        &config_path,
        &[
            "ingest",
            notes.to_str().unwrap(),
            "--id",
            "team/standup",
            "--kind",
            "txt",
        ],
    );
    assert!(success, "stdout={}, stderr={}", stdout, stderr);

    let (stdout, _, _) = run_cqa(&config_path, &["list"]);
    assert!(stdout.contains("team/standup"));
}

#[test]
fn test_ingest_reports_failures() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);
    let csv = dir.join("data.csv");
    fs::write(&csv, "a,b,c").unwrap();
    let blank = dir.join("blank.txt");
    fs::write(&blank, "  \n\n ").unwrap();

    let (stdout, stderr, success) = run_cqa(
        &config_path,
        &[
            "ingest",
            csv.to_str().unwrap(),
            blank.to_str().unwrap(),
            dir.join("policy.txt").to_str().unwrap(),
        ],
    );
    assert!(!success, "ingest should fail: stdout={}", stdout);
    assert!(stdout.contains("failed: 2"), "stdout={}", stdout);
    assert!(stdout.contains("ingested: 1"));
    assert!(stdout.contains("unsupported document kind"));
    assert!(stdout.contains("empty"));
    assert!(stderr.contains("2 document(s) failed"));
}

#[test]
fn test_id_requires_single_file() {
    let (_tmp, config_path) = setup_test_env();
    let dir = files_dir(&config_path);

    let (_, stderr, success) = run_cqa(
        &config_path,
        &["ingest", dir.to_str().unwrap(), "--id", "x"],
    );
    assert!(!success);
    assert!(stderr.contains("--id"));
}

#[test]
fn test_list_documents() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_cqa(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("No documents ingested."));

    ingest_all(&config_path);
    let (stdout, _, success) = run_cqa(&config_path, &["list"]);
    assert!(success);
    assert!(stdout.contains("alice.md"));
    assert!(stdout.contains("markdown"));
    assert!(stdout.contains("3 document(s)"));

    let (stdout, _, success) = run_cqa(&config_path, &["list", "--json"]);
    assert!(success);
    let docs: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<&str> = docs
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["alice.md", "notes/bob.txt", "policy.txt"]);
}

#[test]
fn test_query_dry_run_vacation_policy() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, stderr, success) = run_cqa(
        &config_path,
        &["query", "How many vacation days per month?", "--k", "1", "--dry-run"],
    );
    assert!(success, "stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("retrieved: 1"));
    assert!(stdout.contains("policy.txt#1"), "stdout={}", stdout);
    assert!(stdout.contains("1.5 days per month"));
    assert!(stdout.contains("[policy.txt#1]"));
    assert!(stdout.contains("Question: How many vacation days per month?"));
}

#[test]
fn test_query_dry_run_json() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, _, success) = run_cqa(
        &config_path,
        &["query", "--preset", "Vacation", "--k", "1", "--dry-run", "--json"],
    );
    assert!(success);
    let plan: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(plan["template"], "general");
    assert_eq!(plan["retrieved"][0]["label"]["document_id"], "policy.txt");
    assert_eq!(plan["retrieved"][0]["label"]["chunk_index"], 1);
    let prompt = plan["context"]["prompt"].as_str().unwrap();
    assert!(prompt.contains("1.5 days per month"));
}

#[test]
fn test_query_deterministic() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let args = ["query", "Who runs Kubernetes clusters?", "--dry-run"];
    let (stdout1, _, _) = run_cqa(&config_path, &args);
    let (stdout2, _, _) = run_cqa(&config_path, &args);
    assert_eq!(stdout1, stdout2, "Query results should be deterministic");
}

#[test]
fn test_query_template_selection() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, _, success) = run_cqa(
        &config_path,
        &["query", "Rust skills?", "--template", "technical", "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("template: technical"));
    assert!(stdout.contains("List the skills."));

    let (_, stderr, success) = run_cqa(
        &config_path,
        &["query", "Rust skills?", "--template", "nope", "--dry-run"],
    );
    assert!(!success);
    assert!(stderr.contains("unknown template"), "stderr={}", stderr);
}

#[test]
fn test_query_without_documents_returns_no_context_response() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_cqa(&config_path, &["query", "Who knows Rust?"]);
    assert!(success, "stderr={}", stderr);
    assert!(stdout.contains("I could not find anything"));
    assert!(stdout.contains("Who knows Rust?"));
    assert!(stdout.contains("Sources: none"));
}

#[test]
fn test_query_with_disabled_generator_errors() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (_, stderr, success) =
        run_cqa(&config_path, &["query", "How many vacation days per month?"]);
    assert!(!success);
    assert!(stderr.contains("generation service unavailable"), "stderr={}", stderr);
}

#[test]
fn test_query_rejects_empty_question_and_unknown_preset() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_cqa(&config_path, &["query", "   "]);
    assert!(!success);
    assert!(stderr.contains("question must not be empty"));

    let (_, stderr, success) = run_cqa(&config_path, &["query", "--preset", "Nope"]);
    assert!(!success);
    assert!(stderr.contains("Unknown preset"));
    assert!(stderr.contains("Vacation"));
}

#[test]
fn test_delete_removes_document_from_results() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, _, success) = run_cqa(&config_path, &["delete", "policy.txt"]);
    assert!(success);
    assert!(stdout.contains("Deleted policy.txt."));

    let (stdout, _, _) = run_cqa(
        &config_path,
        &["query", "How many vacation days per month?", "--dry-run", "--json"],
    );
    assert!(!stdout.contains("\"policy.txt\""), "stdout={}", stdout);

    let (stdout, _, success) = run_cqa(&config_path, &["delete", "policy.txt"]);
    assert!(success);
    assert!(stdout.contains("No document with id"));
}

#[test]
fn test_clear_removes_everything() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, _, success) = run_cqa(&config_path, &["clear"]);
    assert!(success);
    assert!(stdout.contains("cleared"));

    let (stdout, _, _) = run_cqa(&config_path, &["list"]);
    assert!(stdout.contains("No documents ingested."));
}

#[test]
fn test_model_change_requires_reindex() {
    let (tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    write_config(tmp.path(), 256);

    let (_, stderr, success) = run_cqa(
        &config_path,
        &["query", "How many vacation days per month?", "--dry-run"],
    );
    assert!(!success);
    assert!(stderr.contains("cqa reindex"), "stderr={}", stderr);

    let (stdout, stderr, success) = run_cqa(&config_path, &["reindex"]);
    assert!(success, "reindex failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("model: hash-256"));
    assert!(stdout.contains("documents: 3"));

    let (stdout, _, success) = run_cqa(
        &config_path,
        &["query", "How many vacation days per month?", "--dry-run"],
    );
    assert!(success);
    assert!(stdout.contains("policy.txt#"));
}

#[test]
fn test_stats() {
    let (_tmp, config_path) = setup_test_env();
    ingest_all(&config_path);

    let (stdout, _, success) = run_cqa(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Documents:   3"));
    assert!(stdout.contains("hash-512 (512 dims)"));
    assert!(stdout.contains("markdown"));
}

#[test]
fn test_templates_lists_presets() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_cqa(&config_path, &["templates"]);
    assert!(success);
    assert!(stdout.contains("Templates (default: general)"));
    assert!(stdout.contains("technical"));
    assert!(stdout.contains("Vacation"));
}
