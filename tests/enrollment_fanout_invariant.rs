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

/// adm is the bootstrap admin, sec a secretary, t1 a teacher.
fn seed_roles(s: &mut Sidecar) {
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
}

fn create_class(s: &mut Sidecar, name: &str) -> String {
    let r = s.ok(
        "classes.create",
        json!({ "caller": caller("sec"), "name": name, "academicYear": "2026" }),
    );
    r["class"]["id"].as_str().expect("class id").to_string()
}

fn create_course(s: &mut Sidecar, name: &str, code: &str) -> String {
    let r = s.ok(
        "courses.create",
        json!({ "caller": caller("adm"), "name": name, "code": code, "teacherId": "t1" }),
    );
    r["course"]["id"].as_str().expect("course id").to_string()
}

fn create_student(s: &mut Sidecar, name: &str, sysid: &str, class_id: Option<&str>) -> String {
    let mut params = json!({
        "caller": caller("sec"),
        "fullName": name,
        "studentSystemId": sysid
    });
    if let Some(class_id) = class_id {
        params["classId"] = json!(class_id);
    }
    let r = s.ok("students.create", params);
    r["student"]["id"].as_str().expect("student id").to_string()
}

fn enrollment_count(s: &mut Sidecar, student_id: &str, course_id: &str) -> usize {
    let r = s.ok(
        "enrollments.list",
        json!({ "caller": caller("sec"), "studentId": student_id, "courseId": course_id }),
    );
    r["enrollments"].as_array().expect("enrollments").len()
}

/// For every student of the class and every assignment of the class there is
/// exactly one enrollment. Scans all three collections, like the invariant
/// is stated.
fn assert_class_invariant(s: &mut Sidecar, class_id: &str) {
    let students = s.ok(
        "students.list",
        json!({ "caller": caller("sec"), "classId": class_id }),
    )["students"]
        .as_array()
        .expect("students")
        .clone();
    let assignments = s.ok(
        "assignments.list",
        json!({ "caller": caller("sec"), "classId": class_id }),
    )["assignments"]
        .as_array()
        .expect("assignments")
        .clone();

    for student in &students {
        let sid = student["id"].as_str().expect("sid");
        for assignment in &assignments {
            let cid = assignment["courseId"].as_str().expect("cid");
            assert_eq!(
                enrollment_count(s, sid, cid),
                1,
                "student {} should be enrolled exactly once in course {}",
                sid,
                cid
            );
        }
    }
}

#[test]
fn assign_enroll_transfer_keep_enrollments_consistent() {
    let workspace = temp_dir("schoolbook-fanout");
    let mut s = Sidecar::start(&workspace);
    seed_roles(&mut s);

    let class_a = create_class(&mut s, "S1 West");
    let class_b = create_class(&mut s, "S1 East");
    let math = create_course(&mut s, "Math", "MATH");
    let english = create_course(&mut s, "English", "ENG");

    let s1 = create_student(&mut s, "Keza Uwera", "S-001", Some(&class_a));
    let s2 = create_student(&mut s, "John Mugisha", "S-002", Some(&class_a));
    let s3 = create_student(&mut s, "Alice Ingabire", "S-003", None);

    // Assigning a course fans out to every current student of the class.
    let r = s.ok(
        "assignments.assign",
        json!({ "caller": caller("sec"), "classId": class_a, "courseId": math }),
    );
    assert_eq!(r["outcome"]["enrollmentsCreated"].as_u64(), Some(2));
    assert_eq!(r["outcome"]["assignedCoursesCount"].as_i64(), Some(1));
    assert_class_invariant(&mut s, &class_a);

    let r = s.ok(
        "assignments.assign",
        json!({ "caller": caller("sec"), "classId": class_a, "courseId": english }),
    );
    assert_eq!(r["outcome"]["enrollmentsCreated"].as_u64(), Some(2));
    assert_eq!(r["outcome"]["assignedCoursesCount"].as_i64(), Some(2));
    assert_class_invariant(&mut s, &class_a);

    // Joining a class picks up every assigned course.
    let r = s.ok(
        "students.enroll",
        json!({ "caller": caller("sec"), "studentId": s3, "classId": class_a }),
    );
    assert_eq!(r["outcome"]["enrollmentsCreated"].as_u64(), Some(2));
    assert_class_invariant(&mut s, &class_a);

    // Class B assigns Math only; transferring s1 there drops English but
    // keeps the shared Math enrollment.
    s.ok(
        "assignments.assign",
        json!({ "caller": caller("sec"), "classId": class_b, "courseId": math }),
    );
    let r = s.ok(
        "students.transfer",
        json!({ "caller": caller("sec"), "studentId": s1, "newClassId": class_b }),
    );
    assert_eq!(
        r["outcome"]["student"]["classId"].as_str(),
        Some(class_b.as_str())
    );
    assert_eq!(r["outcome"]["enrollmentsRemoved"].as_u64(), Some(1));
    assert_eq!(enrollment_count(&mut s, &s1, &english), 0);
    assert_eq!(enrollment_count(&mut s, &s1, &math), 1);
    assert_class_invariant(&mut s, &class_a);
    assert_class_invariant(&mut s, &class_b);

    // Leaving a class removes the class-derived enrollments.
    let r = s.ok(
        "students.unenroll",
        json!({ "caller": caller("sec"), "studentId": s2 }),
    );
    assert_eq!(r["outcome"]["enrollmentsRemoved"].as_u64(), Some(2));
    assert_eq!(enrollment_count(&mut s, &s2, &math), 0);
    assert_class_invariant(&mut s, &class_a);

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
