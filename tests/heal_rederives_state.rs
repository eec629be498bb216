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

/// Simulates the half-applied state the engine guards against by editing the
/// store file directly: one enrollment dropped, one derived count garbled.
fn corrupt_store(workspace: &PathBuf) {
    let conn = rusqlite::Connection::open(workspace.join("schoolbook.sqlite3")).expect("open db");

    let enrollment_id: String = conn
        .query_row(
            "SELECT id FROM documents WHERE collection = 'enrollments' ORDER BY id LIMIT 1",
            [],
            |r| r.get(0),
        )
        .expect("an enrollment to drop");
    conn.execute(
        "DELETE FROM documents WHERE collection = 'enrollments' AND id = ?",
        [&enrollment_id],
    )
    .expect("drop enrollment");

    let (class_id, body): (String, String) = conn
        .query_row(
            "SELECT id, body FROM documents WHERE collection = 'classes' LIMIT 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .expect("a class to garble");
    let mut doc: serde_json::Value = serde_json::from_str(&body).expect("class body");
    doc["assignedCoursesCount"] = json!(99);
    conn.execute(
        "UPDATE documents SET body = ? WHERE collection = 'classes' AND id = ?",
        (doc.to_string(), &class_id),
    )
    .expect("garble count");
}

#[test]
fn heal_restores_enrollments_and_derived_counts() {
    let workspace = temp_dir("schoolbook-heal");
    let mut s = Sidecar::start(&workspace);

    s.ok("profiles.ensure", json!({ "caller": caller("adm") }));
    s.ok("profiles.ensure", json!({ "caller": caller("sec") }));
    s.ok(
        "profiles.setRole",
        json!({ "caller": caller("adm"), "uid": "sec", "role": "secretary" }),
    );

    let class_id = s.ok(
        "classes.create",
        json!({ "caller": caller("sec"), "name": "P6 Red", "academicYear": "2026" }),
    )["class"]["id"]
        .as_str()
        .expect("class id")
        .to_string();
    let course_id = s.ok(
        "courses.create",
        json!({ "caller": caller("adm"), "name": "Geography", "code": "GEO" }),
    )["course"]["id"]
        .as_str()
        .expect("course id")
        .to_string();
    for (name, sysid) in [("Ben Nshimiyimana", "S-601"), ("Clara Umutoni", "S-602")] {
        s.ok(
            "students.create",
            json!({
                "caller": caller("sec"),
                "fullName": name,
                "studentSystemId": sysid,
                "classId": class_id
            }),
        );
    }
    s.ok(
        "assignments.assign",
        json!({ "caller": caller("sec"), "classId": class_id, "courseId": course_id }),
    );

    corrupt_store(&workspace);

    let r = s.ok("maintenance.heal", json!({ "caller": caller("adm") }));
    assert_eq!(r["report"]["enrollmentsCreated"].as_u64(), Some(1));
    assert_eq!(r["report"]["countsFixed"].as_u64(), Some(1));

    let enrollments = s.ok(
        "enrollments.list",
        json!({ "caller": caller("sec"), "courseId": course_id }),
    );
    assert_eq!(enrollments["enrollments"].as_array().map(|e| e.len()), Some(2));
    let classes = s.ok("classes.list", json!({ "caller": caller("sec") }));
    assert_eq!(
        classes["classes"][0]["assignedCoursesCount"].as_i64(),
        Some(1)
    );

    // Re-running finds nothing left to fix.
    let r = s.ok("maintenance.heal", json!({ "caller": caller("adm") }));
    assert_eq!(r["report"]["enrollmentsCreated"].as_u64(), Some(0));
    assert_eq!(r["report"]["countsFixed"].as_u64(), Some(0));

    s.finish();
    let _ = std::fs::remove_dir_all(workspace);
}
