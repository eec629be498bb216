use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolbookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolbookd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: &PathBuf) -> Sidecar {
        let (child, stdin, reader) = spawn_sidecar();
        let mut s = Sidecar {
            child,
            stdin,
            reader,
            next_id: 0,
        };
        s.ok(
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        s
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(true),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").expect("result").clone()
    }

    fn err_code(&mut self, method: &str, params: serde_json::Value) -> String {
        let value = self.call(method, params);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value["error"]["code"].as_str().expect("code").to_string()
    }

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn caller(uid: &str) -> serde_json::Value {
    json!({ "uid": uid, "email": format!("{}@school.test", uid) })
}

fn setup(s: &mut Sidecar) -> (String, String) {
    s.ok("profiles.ensure", json!({ "caller": caller("adm") }));
    s.ok("profiles.ensure", json!({ "caller": caller("sec") }));
    s.ok(
        "profiles.setRole",
        json!({ "caller": caller("adm"), "uid": "sec", "role": "secretary" }),
    );
    s.ok("profiles.ensure", json!({ "caller": caller("t1") }));
    s.ok(
        "profiles.setRole",
        json!({ "caller": caller("adm"), "uid": "t1", "role": "teacher" }),
    );

    let course_id = s.ok(
        "courses.create",
        json!({ "caller": caller("adm"), "name": "Math", "code": "MATH", "teacherId": "t1" }),
    )["course"]["id"]
        .as_str()
        .expect("course id")
        .to_string();
    let student_id = s.ok(
        "students.create",
        json!({
            "caller": caller("sec"),
            "fullName": "Grace Uwase",
            "studentSystemId": "S-201"
        }),
    )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();
    (course_id, student_id)
}

fn upsert(
    s: &mut Sidecar,
    course_id: &str,
    student_id: &str,
    term: &str,
    scores: serde_json::Value,
) -> serde_json::Value {
    let mut params = json!({
        "caller": caller("t1"),
        "studentId": student_id,
        "courseId": course_id,
        "term": term
    });
    for (k, v) in scores.as_object().expect("scores").iter() {
        params[k] = v.clone();
    }
    s.ok("grades.upsert", params)["grade"].clone()
}

#[test]
fn total_and_status_derive_from_submitted_scores() {
    let workspace = temp_dir("schoolbook-grade-fn");
    let mut s = Sidecar::start(&workspace);
    let (course_id, student_id) = setup(&mut s);

    // Default pass mark is 40.
    let g = upsert(
        &mut s,
        &course_id,
        &student_id,
        "T1",
        json!({ "ca1": 18.0, "ca2": 17.0, "exam": 10.0 }),
    );
    assert_eq!(g["totalMarks"].as_f64(), Some(45.0));
    assert_eq!(g["status"].as_str(), Some("Pass"));

    let g = upsert(
        &mut s,
        &course_id,
        &student_id,
        "T2",
        json!({ "ca1": 10.0, "ca2": 10.0, "exam": 15.0 }),
    );
    assert_eq!(g["totalMarks"].as_f64(), Some(35.0));
    assert_eq!(g["status"].as_str(), Some("Fail"));

    // Absent components count as zero; the boundary total passes.
    let g = upsert(
        &mut s,
        &course_id,
        &student_id,
        "T3",
        json!({ "exam": 40.0 }),
    );
    assert_eq!(g["totalMarks"].as_f64(), Some(40.0));
    assert_eq!(g["status"].as_str(), Some("Pass"));

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn no_score_component_is_rejected() {
    let workspace = temp_dir("schoolbook-grade-empty");
    let mut s = Sidecar::start(&workspace);
    let (course_id, student_id) = setup(&mut s);

    let code = s.err_code(
        "grades.upsert",
        json!({
            "caller": caller("t1"),
            "studentId": student_id,
            "courseId": course_id,
            "term": "T1"
        }),
    );
    assert_eq!(code, "validation_error");

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn upsert_replaces_the_same_term_row_and_ignores_caller_status() {
    let workspace = temp_dir("schoolbook-grade-upsert");
    let mut s = Sidecar::start(&workspace);
    let (course_id, student_id) = setup(&mut s);

    upsert(
        &mut s,
        &course_id,
        &student_id,
        "T1",
        json!({ "ca1": 18.0, "ca2": 17.0, "exam": 10.0 }),
    );
    // Second write for the same (student, course, term): replaces, and a
    // caller-supplied status is not an input the engine accepts.
    let g = s.ok(
        "grades.upsert",
        json!({
            "caller": caller("t1"),
            "studentId": student_id,
            "courseId": course_id,
            "term": "T1",
            "exam": 20.0,
            "status": "Pass"
        }),
    )["grade"]
        .clone();
    assert_eq!(g["totalMarks"].as_f64(), Some(20.0));
    assert_eq!(g["status"].as_str(), Some("Fail"));

    let grades = s.ok(
        "grades.list",
        json!({ "caller": caller("t1"), "studentId": student_id, "term": "T1" }),
    );
    assert_eq!(grades["grades"].as_array().map(|g| g.len()), Some(1));

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn pass_mark_is_injected_from_settings() {
    let workspace = temp_dir("schoolbook-grade-passmark");
    let mut s = Sidecar::start(&workspace);
    let (course_id, student_id) = setup(&mut s);

    s.ok(
        "settings.update",
        json!({ "caller": caller("adm"), "passMark": 50.0 }),
    );
    let g = upsert(
        &mut s,
        &course_id,
        &student_id,
        "T1",
        json!({ "ca1": 18.0, "ca2": 17.0, "exam": 10.0 }),
    );
    assert_eq!(g["totalMarks"].as_f64(), Some(45.0));
    assert_eq!(g["status"].as_str(), Some("Fail"));

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
