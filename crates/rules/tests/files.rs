use std::fs;

use promlint_rules::{RulesError, find_rule_files, read_file};

#[test]
fn find_files_in_directories() {
    let dir = tempfile::tempdir().unwrap();
    let nested = dir.path().join("team");
    fs::create_dir(&nested).unwrap();
    fs::write(dir.path().join("a.yml"), "groups: []\n").unwrap();
    fs::write(nested.join("b.yaml"), "groups: []\n").unwrap();
    fs::write(nested.join("notes.txt"), "ignored").unwrap();

    let files = find_rule_files(&[dir.path().to_path_buf()]).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("a.yml"));
    assert!(files[1].ends_with("team/b.yaml"));
}

#[test]
fn explicit_files_are_kept_once() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("rules.txt");
    fs::write(&file, "groups: []\n").unwrap();

    let files = find_rule_files(&[file.clone(), file.clone()]).unwrap();
    assert_eq!(files, vec![file]);
}

#[test]
fn missing_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = find_rule_files(&[dir.path().join("missing")]).unwrap_err();
    assert!(matches!(err, RulesError::Io { .. }));
}

#[test]
fn read_rule_file_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.yml");
    fs::write(
        &path,
        "groups:\n- name: g\n  rules:\n  - alert: Down\n    expr: up == 0\n",
    )
    .unwrap();

    let file = read_file(&path).unwrap();
    assert_eq!(file.path, path);
    let rule = file.rules().next().unwrap();
    assert_eq!(rule.name, "Down");
    assert_eq!(rule.expr, "up == 0");
    assert_eq!(rule.expr_lines.first, 5);
}
