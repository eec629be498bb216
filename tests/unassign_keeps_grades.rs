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

    fn finish(mut self) {
        drop(self.stdin);
        let _ = self.child.wait();
    }
}

fn caller(uid: &str) -> serde_json::Value {
    json!({ "uid": uid, "email": format!("{}@school.test", uid) })
}

#[test]
fn unassign_removes_enrollments_but_grades_stay_readable() {
    let workspace = temp_dir("schoolbook-unassign");
    let mut s = Sidecar::start(&workspace);

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

    let class_id = s.ok(
        "classes.create",
        json!({ "caller": caller("sec"), "name": "C1", "academicYear": "2026" }),
    )["class"]["id"]
        .as_str()
        .expect("class id")
        .to_string();
    let math = s.ok(
        "courses.create",
        json!({ "caller": caller("adm"), "name": "Math", "code": "MATH", "teacherId": "t1" }),
    )["course"]["id"]
        .as_str()
        .expect("course id")
        .to_string();
    let s1 = s.ok(
        "students.create",
        json!({
            "caller": caller("sec"),
            "fullName": "Olive Mutesi",
            "studentSystemId": "S-401",
            "classId": class_id
        }),
    )["student"]["id"]
        .as_str()
        .expect("student id")
        .to_string();

    s.ok(
        "assignments.assign",
        json!({ "caller": caller("sec"), "classId": class_id, "courseId": math }),
    );
    s.ok(
        "grades.upsert",
        json!({
            "caller": caller("t1"),
            "studentId": s1,
            "courseId": math,
            "term": "T1",
            "ca1": 20.0,
            "ca2": 15.0,
            "exam": 30.0
        }),
    );

    let r = s.ok(
        "assignments.unassign",
        json!({ "caller": caller("sec"), "classId": class_id, "courseId": math }),
    );
    assert_eq!(r["outcome"]["removed"].as_bool(), Some(true));
    assert_eq!(r["outcome"]["enrollmentsRemoved"].as_u64(), Some(1));
    assert_eq!(r["outcome"]["assignedCoursesCount"].as_i64(), Some(0));

    let enrollments = s.ok(
        "enrollments.list",
        json!({ "caller": caller("sec"), "studentId": s1, "courseId": math }),
    );
    assert_eq!(enrollments["enrollments"].as_array().map(|e| e.len()), Some(0));

    // The historical grade survives, still keyed to the course id.
    let grades = s.ok(
        "grades.list",
        json!({ "caller": caller("t1"), "studentId": s1, "courseId": math }),
    );
    let rows = grades["grades"].as_array().expect("grades");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["term"].as_str(), Some("T1"));
    assert_eq!(rows[0]["totalMarks"].as_f64(), Some(65.0));

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
