use assert_cmd::prelude::*;
use predicates::str::contains;
use std::io::Write;
use std::process::Command;
use tempfile::NamedTempFile;

fn write_scene() -> NamedTempFile {
    // Default camera at (0, 2, 6) looking at the origin; the second cube sits
    // behind it and must be culled.
    let scene = r#"<scene>
  <sun>
    <direction>0 1 0</direction>
    <color>2 2 2</color>
  </sun>
  <object>
    <name>Front</name>
    <position>0 0 0</position>
  </object>
  <object>
    <name>Behind</name>
    <position>0 0 50</position>
  </object>
  <light><position>0 3 0</position><radius>5</radius></light>
  <light><position>2 1 0</position></light>
  <light><position>-2 1 0</position><color>4 0 0</color></light>
</scene>
"#;
    let mut tmp = NamedTempFile::new().expect("temp scene");
    tmp.write_all(scene.as_bytes()).expect("write scene");
    tmp
}

#[test]
fn headless_run_reports_culling_per_frame() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("lumen-renderer").expect("binary exists");
    cmd.arg(scene.path()).arg("--headless").arg("--frames").arg("2");
    cmd.assert()
        .success()
        .stdout(contains("Loaded scene with 2 objects (3 lights)"))
        .stdout(contains(" - Front (builtin cube)"))
        .stdout(contains(
            "Frame 1: drew 1 of 2 objects (1 culled), 3 light record(s)",
        ))
        .stdout(contains(
            "Frame 2: drew 1 of 2 objects (1 culled), 3 light record(s)",
        ));
}

#[test]
fn headless_run_without_prepass() {
    let scene = write_scene();
    let mut cmd = Command::cargo_bin("lumen-renderer").expect("binary exists");
    cmd.arg(scene.path()).arg("--headless").arg("--no-z-prepass");
    cmd.assert()
        .success()
        .stdout(contains("Frame 1: drew 1 of 2 objects"));
}

#[test]
fn empty_scene_uploads_one_padded_light_record() {
    let mut scene = NamedTempFile::new().expect("temp scene");
    scene.write_all(b"<scene/>").expect("write scene");
    let mut cmd = Command::cargo_bin("lumen-renderer").expect("binary exists");
    cmd.arg(scene.path()).arg("--headless");
    cmd.assert()
        .success()
        .stdout(contains("Loaded scene with 0 objects (0 lights)"))
        .stdout(contains(
            "Frame 1: drew 0 of 0 objects (0 culled), 1 light record(s)",
        ));
}

#[test]
fn missing_scene_file_fails() {
    let mut cmd = Command::cargo_bin("lumen-renderer").expect("binary exists");
    cmd.arg("definitely/not/here.xml").arg("--headless");
    cmd.assert()
        .failure()
        .stderr(contains("failed to load scene"));
}
