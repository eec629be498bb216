use crate::errors::{DenyReason, OpError};
use crate::model::{Role, UserProfile};
use crate::repo;
use crate::store::DocIo;

/// Authenticated caller after the profile lookup. The role always comes from
/// the stored profile; role claims on the wire are never trusted.
#[derive(Debug, Clone)]
pub struct Caller {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub role: Role,
}

impl Caller {
    /// Name used for denormalized "who did this" fields.
    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| self.email.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    School,
    Profile,
    Course,
    Class,
    Assignment,
    Student,
    Enrollment,
    Grade,
    Term,
    TeacherGroup,
    Feedback,
    Settings,
}

/// What the gate evaluates against: the kind of entity plus, for grades, the
/// owning course's teacher (the teacher-scope boundary).
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: ResourceKind,
    pub course_teacher_id: Option<String>,
}

impl Resource {
    pub fn of(kind: ResourceKind) -> Resource {
        Resource {
            kind,
            course_teacher_id: None,
        }
    }

    pub fn grade_of_course(teacher_id: Option<&str>) -> Resource {
        Resource {
            kind: ResourceKind::Grade,
            course_teacher_id: teacher_id.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

/// Stateless role x resource x action table, first match wins. Consulted
/// before every engine call; never mutates anything itself.
pub fn authorize(caller: &Caller, resource: &Resource, action: Action) -> Decision {
    match caller.role {
        Role::Admin => Decision::Allow,
        Role::Teacher => authorize_teacher(caller, resource, action),
        Role::Secretary => authorize_secretary(resource, action),
        Role::Pending => Decision::Deny(DenyReason::RoleForbidden),
    }
}

fn authorize_teacher(caller: &Caller, resource: &Resource, action: Action) -> Decision {
    use ResourceKind::*;
    match (resource.kind, action) {
        // Grade scope follows course ownership, for reads and writes alike.
        (Grade, _) => {
            if resource.course_teacher_id.as_deref() == Some(caller.uid.as_str()) {
                Decision::Allow
            } else {
                Decision::Deny(DenyReason::NotOwner)
            }
        }
        (Course | Class | Student | Enrollment | Term | Settings, Action::Read) => Decision::Allow,
        (Feedback, Action::Write) => Decision::Allow,
        _ => Decision::Deny(DenyReason::RoleForbidden),
    }
}

fn authorize_secretary(resource: &Resource, action: Action) -> Decision {
    use ResourceKind::*;
    match (resource.kind, action) {
        (_, Action::Read) => Decision::Allow,
        (Student | Class | Enrollment | Assignment | Feedback, Action::Write) => Decision::Allow,
        _ => Decision::Deny(DenyReason::RoleForbidden),
    }
}

/// Gate check that converts a Deny into the surfaced error.
pub fn require(caller: &Caller, resource: &Resource, action: Action) -> Result<(), OpError> {
    match authorize(caller, resource, action) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => {
            let verb = match action {
                Action::Read => "read",
                Action::Write => "write",
            };
            Err(OpError::denied(
                reason,
                format!("role {} may not {} this resource", caller.role.as_str(), verb),
            ))
        }
    }
}

/// Resolves `params.caller` ({uid, email} from the identity provider) to a
/// profile-backed Caller. An unknown uid is unauthenticated until
/// `profiles.ensure` has run for it.
pub fn resolve_caller(db: &impl DocIo, params: &serde_json::Value) -> Result<Caller, OpError> {
    let uid = params
        .get("caller")
        .and_then(|c| c.get("uid"))
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            OpError::denied(DenyReason::Unauthenticated, "missing caller identity")
        })?;

    let profile = repo::find::<UserProfile>(db, uid)?.ok_or_else(|| {
        OpError::denied(
            DenyReason::Unauthenticated,
            "unknown identity; call profiles.ensure first",
        )
    })?;

    Ok(Caller {
        uid: profile.id.clone(),
        email: profile.email.clone(),
        display_name: profile.display_name.clone(),
        role: profile.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(uid: &str, role: Role) -> Caller {
        Caller {
            uid: uid.to_string(),
            email: format!("{}@school.test", uid),
            display_name: None,
            role,
        }
    }

    #[test]
    fn admin_allows_everything() {
        let c = caller("a1", Role::Admin);
        for kind in [
            ResourceKind::School,
            ResourceKind::Profile,
            ResourceKind::Course,
            ResourceKind::Grade,
            ResourceKind::Settings,
        ] {
            assert_eq!(
                authorize(&c, &Resource::of(kind), Action::Write),
                Decision::Allow
            );
        }
        // Ownership check is bypassed entirely.
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(Some("t2")), Action::Write),
            Decision::Allow
        );
    }

    #[test]
    fn teacher_grade_scope_follows_course_ownership() {
        let c = caller("t1", Role::Teacher);
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(Some("t1")), Action::Write),
            Decision::Allow
        );
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(Some("t2")), Action::Write),
            Decision::Deny(DenyReason::NotOwner)
        );
        // A course with no owner is nobody's to grade.
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(None), Action::Read),
            Decision::Deny(DenyReason::NotOwner)
        );
    }

    #[test]
    fn teacher_browses_but_never_mutates_records() {
        let c = caller("t1", Role::Teacher);
        for kind in [
            ResourceKind::Course,
            ResourceKind::Class,
            ResourceKind::Student,
            ResourceKind::Enrollment,
        ] {
            assert_eq!(
                authorize(&c, &Resource::of(kind), Action::Read),
                Decision::Allow
            );
            assert_eq!(
                authorize(&c, &Resource::of(kind), Action::Write),
                Decision::Deny(DenyReason::RoleForbidden)
            );
        }
    }

    #[test]
    fn secretary_writes_records_never_grades() {
        let c = caller("s1", Role::Secretary);
        for kind in [
            ResourceKind::Student,
            ResourceKind::Class,
            ResourceKind::Enrollment,
            ResourceKind::Assignment,
        ] {
            assert_eq!(
                authorize(&c, &Resource::of(kind), Action::Write),
                Decision::Allow
            );
        }
        // Denied by role before ownership is even considered.
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(Some("s1")), Action::Write),
            Decision::Deny(DenyReason::RoleForbidden)
        );
        assert_eq!(
            authorize(&c, &Resource::of(ResourceKind::Course), Action::Write),
            Decision::Deny(DenyReason::RoleForbidden)
        );
        assert_eq!(
            authorize(&c, &Resource::of(ResourceKind::Grade), Action::Read),
            Decision::Allow
        );
    }

    #[test]
    fn pending_role_is_denied_everything() {
        let c = caller("p1", Role::Pending);
        assert_eq!(
            authorize(&c, &Resource::of(ResourceKind::Student), Action::Read),
            Decision::Deny(DenyReason::RoleForbidden)
        );
        assert_eq!(
            authorize(&c, &Resource::grade_of_course(Some("p1")), Action::Write),
            Decision::Deny(DenyReason::RoleForbidden)
        );
    }
}
