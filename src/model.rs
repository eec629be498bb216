use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::OpError;

/// One stored document type. Each entity lives in its own collection and
/// carries server-assigned timestamps; the repository is the only place that
/// stamps them.
pub trait Doc: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
    fn created_at(&self) -> &str;
    fn set_created_at(&mut self, ts: String);
    fn updated_at(&self) -> &str;
    fn set_updated_at(&mut self, ts: String);
    /// Shape check run at the repository boundary on every create/update.
    fn validate(&self) -> Result<(), OpError>;
}

macro_rules! impl_doc {
    ($ty:ty, $coll:literal) => {
        impl Doc for $ty {
            const COLLECTION: &'static str = $coll;

            fn id(&self) -> &str {
                &self.id
            }
            fn created_at(&self) -> &str {
                &self.created_at
            }
            fn set_created_at(&mut self, ts: String) {
                self.created_at = ts;
            }
            fn updated_at(&self) -> &str {
                &self.updated_at
            }
            fn set_updated_at(&mut self, ts: String) {
                self.updated_at = ts;
            }
            fn validate(&self) -> Result<(), OpError> {
                self.check()
            }
        }
    };
}

fn require(field: &'static str, value: &str) -> Result<(), OpError> {
    if value.trim().is_empty() {
        Err(OpError::validation(format!("{} must not be empty", field)))
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Secretary,
    /// First-login state: no privileges until an admin assigns a real role.
    Pending,
}

impl Default for Role {
    fn default() -> Self {
        Role::Pending
    }
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Secretary => "secretary",
            Role::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "secretary" => Some(Role::Secretary),
            "pending" => Some(Role::Pending),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradeStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub school_type: String,
    #[serde(default)]
    pub admin_uids: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl School {
    fn check(&self) -> Result<(), OpError> {
        require("name", &self.name)?;
        require("schoolType", &self.school_type)
    }
}
impl_doc!(School, "schools");

/// Profile id is the identity provider's uid, not a generated UUID, so the
/// role lookup for a caller is a single read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_group_id: Option<String>,
    /// Derived cache of the names of courses this teacher owns; rebuilt by
    /// the engine, never edited directly.
    #[serde(default)]
    pub assigned_course_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl UserProfile {
    fn check(&self) -> Result<(), OpError> {
        require("uid", &self.id)?;
        require("email", &self.email)
    }
}
impl_doc!(UserProfile, "profiles");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub name: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Course {
    fn check(&self) -> Result<(), OpError> {
        require("name", &self.name)?;
        require("code", &self.code)
    }
}
impl_doc!(Course, "courses");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub academic_year: String,
    pub secretary_id: String,
    pub secretary_name: String,
    /// Derived: count of assignment documents referencing this class.
    #[serde(default)]
    pub assigned_courses_count: i64,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Class {
    fn check(&self) -> Result<(), OpError> {
        require("name", &self.name)?;
        require("academicYear", &self.academic_year)
    }
}
impl_doc!(Class, "classes");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassCourseAssignment {
    pub id: String,
    pub class_id: String,
    pub class_name: String,
    pub course_id: String,
    pub course_name: String,
    pub assigned_at: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl ClassCourseAssignment {
    fn check(&self) -> Result<(), OpError> {
        require("classId", &self.class_id)?;
        require("courseId", &self.course_id)
    }
}
impl_doc!(ClassCourseAssignment, "assignments");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub full_name: String,
    pub student_system_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_of_birth: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guardian_phone: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Student {
    fn check(&self) -> Result<(), OpError> {
        require("fullName", &self.full_name)?;
        require("studentSystemId", &self.student_system_id)
    }
}
impl_doc!(Student, "students");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub course_id: String,
    pub course_name: String,
    pub enrolled_at: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Enrollment {
    fn check(&self) -> Result<(), OpError> {
        require("studentId", &self.student_id)?;
        require("courseId", &self.course_id)
    }
}
impl_doc!(Enrollment, "enrollments");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub course_id: String,
    pub course_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca1: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exam: Option<f64>,
    /// Derived: sum of the present score components. Never accepted from the
    /// caller; recomputed on every write.
    pub total_marks: f64,
    pub status: GradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
    pub term: String,
    pub entered_by_teacher_id: String,
    pub entered_by_email: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Grade {
    fn check(&self) -> Result<(), OpError> {
        require("studentId", &self.student_id)?;
        require("courseId", &self.course_id)?;
        require("term", &self.term)?;
        if !self.total_marks.is_finite() {
            return Err(OpError::validation("totalMarks must be a finite number"));
        }
        Ok(())
    }
}
impl_doc!(Grade, "grades");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicTerm {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub current: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl AcademicTerm {
    fn check(&self) -> Result<(), OpError> {
        require("name", &self.name)
    }
}
impl_doc!(AcademicTerm, "terms");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl TeacherGroup {
    fn check(&self) -> Result<(), OpError> {
        require("name", &self.name)
    }
}
impl_doc!(TeacherGroup, "teacher_groups");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub author_uid: String,
    pub author_email: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Feedback {
    fn check(&self) -> Result<(), OpError> {
        require("message", &self.message)
    }
}
impl_doc!(Feedback, "feedback");

pub const SETTINGS_DOC_ID: &str = "settings";
pub const DEFAULT_PASS_MARK: f64 = 40.0;

/// Singleton configuration document. `passMark` is the injected threshold the
/// grading engine compares totals against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub id: String,
    pub pass_mark: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_name: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Settings {
    fn check(&self) -> Result<(), OpError> {
        if !self.pass_mark.is_finite() || self.pass_mark <= 0.0 {
            return Err(OpError::validation("passMark must be a positive number"));
        }
        Ok(())
    }
}
impl_doc!(Settings, "settings");
