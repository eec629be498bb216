//! Multi-collection operations. Every operation here runs inside a store
//! transaction: either the whole fan-out commits or none of it does. Each
//! step is create-if-absent / delete-if-present so an aborted-and-retried
//! transaction converges on the same end state, and derived fields (the
//! class course count, a teacher's course-name cache) are recomputed from
//! the join records rather than incremented.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::errors::OpError;
use crate::model::{
    Class, ClassCourseAssignment, Course, Enrollment, Grade, Student, UserProfile,
};
use crate::repo;
use crate::store::{DocIo, Store};

fn assignments_of_class(
    db: &impl DocIo,
    class_id: &str,
) -> Result<Vec<ClassCourseAssignment>, OpError> {
    repo::list(db, |a: &ClassCourseAssignment| a.class_id == class_id)
}

fn students_of_class(db: &impl DocIo, class_id: &str) -> Result<Vec<Student>, OpError> {
    repo::list(db, |s: &Student| s.class_id.as_deref() == Some(class_id))
}

fn enrollments_of_pair(
    db: &impl DocIo,
    student_id: &str,
    course_id: &str,
) -> Result<Vec<Enrollment>, OpError> {
    repo::list(db, |e: &Enrollment| {
        e.student_id == student_id && e.course_id == course_id
    })
}

/// Create-if-absent; "already enrolled" is success, not an error.
fn ensure_enrollment(
    db: &impl DocIo,
    student: &Student,
    course: &Course,
) -> Result<bool, OpError> {
    if !enrollments_of_pair(db, &student.id, &course.id)?.is_empty() {
        return Ok(false);
    }
    repo::create(
        db,
        Enrollment {
            id: Uuid::new_v4().to_string(),
            student_id: student.id.clone(),
            student_name: student.full_name.clone(),
            course_id: course.id.clone(),
            course_name: course.name.clone(),
            enrolled_at: repo::now_rfc3339(),
            created_at: String::new(),
            updated_at: String::new(),
        },
    )?;
    Ok(true)
}

/// Delete-if-present counterpart.
fn remove_enrollments_of_pair(
    db: &impl DocIo,
    student_id: &str,
    course_id: &str,
) -> Result<usize, OpError> {
    let hits = enrollments_of_pair(db, student_id, course_id)?;
    let n = hits.len();
    for e in hits {
        repo::delete::<Enrollment>(db, &e.id)?;
    }
    Ok(n)
}

/// Recomputes the class's assignment count from the join records and writes
/// it back only when stale.
fn recount_class(db: &impl DocIo, class_id: &str) -> Result<i64, OpError> {
    let count = assignments_of_class(db, class_id)?.len() as i64;
    let mut class = repo::get::<Class>(db, class_id)?;
    if class.assigned_courses_count != count {
        class.assigned_courses_count = count;
        repo::update(db, class)?;
    }
    Ok(count)
}

/// Rebuilds a teacher profile's course-name cache from the course collection.
fn refresh_teacher_cache(db: &impl DocIo, uid: &str) -> Result<bool, OpError> {
    let Some(mut profile) = repo::find::<UserProfile>(db, uid)? else {
        return Ok(false);
    };
    let mut names: Vec<String> =
        repo::list(db, |c: &Course| c.teacher_id.as_deref() == Some(uid))?
            .into_iter()
            .map(|c| c.name)
            .collect();
    names.sort();
    if profile.assigned_course_names != names {
        profile.assigned_course_names = names;
        repo::update(db, profile)?;
        return Ok(true);
    }
    Ok(false)
}

fn course_for_assignment(
    db: &impl DocIo,
    assignment: &ClassCourseAssignment,
) -> Result<Course, OpError> {
    repo::find::<Course>(db, &assignment.course_id)?.ok_or_else(|| {
        OpError::reference(format!(
            "course {} referenced by assignment {} is missing",
            assignment.course_id, assignment.id
        ))
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignOutcome {
    pub assignment: ClassCourseAssignment,
    pub already_assigned: bool,
    pub enrollments_created: usize,
    pub assigned_courses_count: i64,
}

/// Links a course to a class and enrolls every current student of the class.
/// Re-running after a partial failure completes the fan-out instead of
/// duplicating it.
pub fn assign_course_to_class(
    store: &mut Store,
    class_id: &str,
    course_id: &str,
) -> Result<AssignOutcome, OpError> {
    store.run_transaction(|tx| {
        let class = repo::get::<Class>(tx, class_id)?;
        let course = repo::get::<Course>(tx, course_id)?;

        let existing = assignments_of_class(tx, class_id)?
            .into_iter()
            .find(|a| a.course_id == course_id);
        let already_assigned = existing.is_some();
        let assignment = match existing {
            Some(a) => a,
            None => repo::create(
                tx,
                ClassCourseAssignment {
                    id: Uuid::new_v4().to_string(),
                    class_id: class.id.clone(),
                    class_name: class.name.clone(),
                    course_id: course.id.clone(),
                    course_name: course.name.clone(),
                    assigned_at: repo::now_rfc3339(),
                    created_at: String::new(),
                    updated_at: String::new(),
                },
            )?,
        };

        let mut enrollments_created = 0;
        for student in students_of_class(tx, class_id)? {
            if ensure_enrollment(tx, &student, &course)? {
                enrollments_created += 1;
            }
        }
        let assigned_courses_count = recount_class(tx, class_id)?;

        Ok(AssignOutcome {
            assignment,
            already_assigned,
            enrollments_created,
            assigned_courses_count,
        })
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnassignOutcome {
    pub removed: bool,
    pub enrollments_removed: usize,
    pub assigned_courses_count: i64,
}

/// Inverse of assign. Grades are deliberately untouched: a grade whose
/// enrollment is gone is a valid historical record.
pub fn unassign_course_from_class(
    store: &mut Store,
    class_id: &str,
    course_id: &str,
) -> Result<UnassignOutcome, OpError> {
    store.run_transaction(|tx| {
        repo::get::<Class>(tx, class_id)?;

        let existing = assignments_of_class(tx, class_id)?
            .into_iter()
            .find(|a| a.course_id == course_id);
        let removed = existing.is_some();
        if let Some(a) = existing {
            repo::delete::<ClassCourseAssignment>(tx, &a.id)?;
        }

        let mut enrollments_removed = 0;
        for student in students_of_class(tx, class_id)? {
            enrollments_removed += remove_enrollments_of_pair(tx, &student.id, course_id)?;
        }
        let assigned_courses_count = recount_class(tx, class_id)?;

        Ok(UnassignOutcome {
            removed,
            enrollments_removed,
            assigned_courses_count,
        })
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollOutcome {
    pub student: Student,
    pub enrollments_created: usize,
    pub enrollments_removed: usize,
}

/// Links a student to a class and enrolls them in every course assigned to
/// it. A student switching classes loses the enrollments derived from the
/// old class first (minus courses both classes share), all in the same
/// transaction, so they are never enrolled through two classes at once.
pub fn enroll_student_in_class(
    store: &mut Store,
    student_id: &str,
    class_id: &str,
) -> Result<EnrollOutcome, OpError> {
    store.run_transaction(|tx| {
        let mut student = repo::get::<Student>(tx, student_id)?;
        let class = repo::get::<Class>(tx, class_id)?;
        let new_assignments = assignments_of_class(tx, class_id)?;

        let mut enrollments_removed = 0;
        if let Some(old_class_id) = student.class_id.clone() {
            if old_class_id != class_id {
                let keep: HashSet<&str> = new_assignments
                    .iter()
                    .map(|a| a.course_id.as_str())
                    .collect();
                for a in assignments_of_class(tx, &old_class_id)? {
                    if !keep.contains(a.course_id.as_str()) {
                        enrollments_removed +=
                            remove_enrollments_of_pair(tx, student_id, &a.course_id)?;
                    }
                }
            }
        }

        let linked = student.class_id.as_deref() == Some(class_id)
            && student.class_name.as_deref() == Some(class.name.as_str());
        if !linked {
            student.class_id = Some(class.id.clone());
            student.class_name = Some(class.name.clone());
            student = repo::update(tx, student)?;
        }

        let mut enrollments_created = 0;
        for a in &new_assignments {
            let course = course_for_assignment(tx, a)?;
            if ensure_enrollment(tx, &student, &course)? {
                enrollments_created += 1;
            }
        }

        Ok(EnrollOutcome {
            student,
            enrollments_created,
            enrollments_removed,
        })
    })
}

/// Unenroll-from-old plus enroll-in-new as one unit.
pub fn transfer_student(
    store: &mut Store,
    student_id: &str,
    new_class_id: &str,
) -> Result<EnrollOutcome, OpError> {
    enroll_student_in_class(store, student_id, new_class_id)
}

/// Removes the class link and the enrollments that were derived from it.
pub fn unenroll_student_from_class(
    store: &mut Store,
    student_id: &str,
) -> Result<EnrollOutcome, OpError> {
    store.run_transaction(|tx| {
        let mut student = repo::get::<Student>(tx, student_id)?;
        let mut enrollments_removed = 0;
        if let Some(old_class_id) = student.class_id.clone() {
            for a in assignments_of_class(tx, &old_class_id)? {
                enrollments_removed +=
                    remove_enrollments_of_pair(tx, student_id, &a.course_id)?;
            }
            student.class_id = None;
            student.class_name = None;
            student = repo::update(tx, student)?;
        }
        Ok(EnrollOutcome {
            student,
            enrollments_created: 0,
            enrollments_removed,
        })
    })
}

/// Creates the student and, when a class is given, runs the enrollment
/// fan-out in the same transaction.
pub fn create_student(
    store: &mut Store,
    student: &Student,
    class_id: Option<&str>,
) -> Result<(Student, usize), OpError> {
    store.run_transaction(|tx| {
        let mut doc = student.clone();
        doc.class_id = None;
        doc.class_name = None;

        let mut enrollments_created = 0;
        if let Some(class_id) = class_id {
            let class = repo::get::<Class>(tx, class_id)?;
            doc.class_id = Some(class.id.clone());
            doc.class_name = Some(class.name.clone());
            let created = repo::create(tx, doc)?;
            for a in assignments_of_class(tx, class_id)? {
                let course = course_for_assignment(tx, &a)?;
                if ensure_enrollment(tx, &created, &course)? {
                    enrollments_created += 1;
                }
            }
            Ok((created, enrollments_created))
        } else {
            Ok((repo::create(tx, doc)?, 0))
        }
    })
}

fn resolve_course_owner(
    db: &impl DocIo,
    teacher_id: &str,
) -> Result<(String, String), OpError> {
    let profile = repo::find::<UserProfile>(db, teacher_id)?.ok_or_else(|| {
        OpError::validation(format!("no profile for teacherId {}", teacher_id))
    })?;
    let name = profile
        .display_name
        .clone()
        .unwrap_or_else(|| profile.email.clone());
    Ok((profile.id, name))
}

/// Creates a course, resolving the denormalized owner name and rebuilding the
/// owner's course-name cache.
pub fn create_course(store: &mut Store, course: &Course) -> Result<Course, OpError> {
    store.run_transaction(|tx| {
        let mut doc = course.clone();
        if let Some(teacher_id) = doc.teacher_id.clone() {
            let (uid, name) = resolve_course_owner(tx, &teacher_id)?;
            doc.teacher_id = Some(uid.clone());
            doc.teacher_name = Some(name);
            let created = repo::create(tx, doc)?;
            refresh_teacher_cache(tx, &uid)?;
            Ok(created)
        } else {
            doc.teacher_name = None;
            repo::create(tx, doc)
        }
    })
}

/// Field-presence patch: `None` leaves a field alone, `Some(None)` clears an
/// optional one.
#[derive(Debug, Default, Clone)]
pub struct CoursePatch {
    pub name: Option<String>,
    pub code: Option<String>,
    pub description: Option<Option<String>>,
    pub category: Option<Option<String>>,
    pub combination: Option<Option<String>>,
    pub teacher_id: Option<Option<String>>,
}

/// Applies the patch, then re-derives everything hanging off the course: the
/// old and new owners' caches inside the transaction, and the name copies on
/// referencing documents as a follow-up bulk pass (readers may briefly see
/// the old name; IDs stay correct throughout).
pub fn update_course(
    store: &mut Store,
    course_id: &str,
    patch: &CoursePatch,
) -> Result<Course, OpError> {
    let (course, name_changed) = store.run_transaction(|tx| {
        let mut course = repo::get::<Course>(tx, course_id)?;
        let old_name = course.name.clone();
        let old_teacher = course.teacher_id.clone();

        if let Some(name) = &patch.name {
            course.name = name.clone();
        }
        if let Some(code) = &patch.code {
            course.code = code.clone();
        }
        if let Some(description) = &patch.description {
            course.description = description.clone();
        }
        if let Some(category) = &patch.category {
            course.category = category.clone();
        }
        if let Some(combination) = &patch.combination {
            course.combination = combination.clone();
        }
        if let Some(teacher_id) = &patch.teacher_id {
            match teacher_id {
                Some(uid) => {
                    let (uid, name) = resolve_course_owner(tx, uid)?;
                    course.teacher_id = Some(uid);
                    course.teacher_name = Some(name);
                }
                None => {
                    course.teacher_id = None;
                    course.teacher_name = None;
                }
            }
        }

        let course = repo::update(tx, course)?;
        if let Some(old) = &old_teacher {
            refresh_teacher_cache(tx, old)?;
        }
        if let Some(new) = &course.teacher_id {
            if old_teacher.as_deref() != Some(new.as_str()) {
                refresh_teacher_cache(tx, new)?;
            }
        }
        let name_changed = course.name != old_name;
        Ok((course, name_changed))
    })?;

    if name_changed {
        propagate_course_name(store, course_id)?;
    }
    Ok(course)
}

#[derive(Debug, Default, Clone)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub academic_year: Option<String>,
}

pub fn update_class(
    store: &mut Store,
    class_id: &str,
    patch: &ClassPatch,
) -> Result<Class, OpError> {
    let (class, name_changed) = store.run_transaction(|tx| {
        let mut class = repo::get::<Class>(tx, class_id)?;
        let old_name = class.name.clone();
        if let Some(name) = &patch.name {
            class.name = name.clone();
        }
        if let Some(description) = &patch.description {
            class.description = description.clone();
        }
        if let Some(academic_year) = &patch.academic_year {
            class.academic_year = academic_year.clone();
        }
        let name_changed = class.name != old_name;
        Ok((repo::update(tx, class)?, name_changed))
    })?;

    if name_changed {
        propagate_class_name(store, class_id)?;
    }
    Ok(class)
}

#[derive(Debug, Default, Clone)]
pub struct StudentPatch {
    pub full_name: Option<String>,
    pub student_system_id: Option<String>,
    pub email: Option<Option<String>>,
    pub gender: Option<Option<String>>,
    pub date_of_birth: Option<Option<String>>,
    pub guardian_name: Option<Option<String>>,
    pub guardian_phone: Option<Option<String>>,
}

pub fn update_student(
    store: &mut Store,
    student_id: &str,
    patch: &StudentPatch,
) -> Result<Student, OpError> {
    let (student, name_changed) = store.run_transaction(|tx| {
        let mut student = repo::get::<Student>(tx, student_id)?;
        let old_name = student.full_name.clone();
        if let Some(full_name) = &patch.full_name {
            student.full_name = full_name.clone();
        }
        if let Some(v) = &patch.student_system_id {
            student.student_system_id = v.clone();
        }
        if let Some(v) = &patch.email {
            student.email = v.clone();
        }
        if let Some(v) = &patch.gender {
            student.gender = v.clone();
        }
        if let Some(v) = &patch.date_of_birth {
            student.date_of_birth = v.clone();
        }
        if let Some(v) = &patch.guardian_name {
            student.guardian_name = v.clone();
        }
        if let Some(v) = &patch.guardian_phone {
            student.guardian_phone = v.clone();
        }
        let name_changed = student.full_name != old_name;
        Ok((repo::update(tx, student)?, name_changed))
    })?;

    if name_changed {
        propagate_student_name(store, student_id)?;
    }
    Ok(student)
}

/// Re-derives the denormalized course name (and the owner's cache) on every
/// referencing document. Idempotent; safe to re-run at any time.
pub fn propagate_course_name(store: &mut Store, course_id: &str) -> Result<usize, OpError> {
    store.run_transaction(|tx| {
        let Some(course) = repo::find::<Course>(tx, course_id)? else {
            return Ok(0);
        };
        let mut fixed = 0;
        for mut a in repo::list(tx, |a: &ClassCourseAssignment| a.course_id == course_id)? {
            if a.course_name != course.name {
                a.course_name = course.name.clone();
                repo::update(tx, a)?;
                fixed += 1;
            }
        }
        for mut e in repo::list(tx, |e: &Enrollment| e.course_id == course_id)? {
            if e.course_name != course.name {
                e.course_name = course.name.clone();
                repo::update(tx, e)?;
                fixed += 1;
            }
        }
        for mut g in repo::list(tx, |g: &Grade| g.course_id == course_id)? {
            if g.course_name != course.name {
                g.course_name = course.name.clone();
                repo::update(tx, g)?;
                fixed += 1;
            }
        }
        if let Some(uid) = &course.teacher_id {
            if refresh_teacher_cache(tx, uid)? {
                fixed += 1;
            }
        }
        Ok(fixed)
    })
}

pub fn propagate_class_name(store: &mut Store, class_id: &str) -> Result<usize, OpError> {
    store.run_transaction(|tx| {
        let Some(class) = repo::find::<Class>(tx, class_id)? else {
            return Ok(0);
        };
        let mut fixed = 0;
        for mut a in repo::list(tx, |a: &ClassCourseAssignment| a.class_id == class_id)? {
            if a.class_name != class.name {
                a.class_name = class.name.clone();
                repo::update(tx, a)?;
                fixed += 1;
            }
        }
        for mut s in students_of_class(tx, class_id)? {
            if s.class_name.as_deref() != Some(class.name.as_str()) {
                s.class_name = Some(class.name.clone());
                repo::update(tx, s)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    })
}

pub fn propagate_student_name(store: &mut Store, student_id: &str) -> Result<usize, OpError> {
    store.run_transaction(|tx| {
        let Some(student) = repo::find::<Student>(tx, student_id)? else {
            return Ok(0);
        };
        let mut fixed = 0;
        for mut e in repo::list(tx, |e: &Enrollment| e.student_id == student_id)? {
            if e.student_name != student.full_name {
                e.student_name = student.full_name.clone();
                repo::update(tx, e)?;
                fixed += 1;
            }
        }
        for mut g in repo::list(tx, |g: &Grade| g.student_id == student_id)? {
            if g.student_name != student.full_name {
                g.student_name = student.full_name.clone();
                repo::update(tx, g)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    })
}

/// Re-derives the owner name on courses after a profile's display name or
/// email changes.
pub fn propagate_teacher_name(store: &mut Store, uid: &str) -> Result<usize, OpError> {
    store.run_transaction(|tx| {
        let Some(profile) = repo::find::<UserProfile>(tx, uid)? else {
            return Ok(0);
        };
        let name = profile
            .display_name
            .clone()
            .unwrap_or_else(|| profile.email.clone());
        let mut fixed = 0;
        for mut c in repo::list(tx, |c: &Course| c.teacher_id.as_deref() == Some(uid))? {
            if c.teacher_name.as_deref() != Some(name.as_str()) {
                c.teacher_name = Some(name.clone());
                repo::update(tx, c)?;
                fixed += 1;
            }
        }
        Ok(fixed)
    })
}

/// Deletes a student and their enrollments. Grades stay as history.
pub fn delete_student(store: &mut Store, student_id: &str) -> Result<usize, OpError> {
    store.run_transaction(|tx| {
        repo::get::<Student>(tx, student_id)?;
        let enrollments = repo::list(tx, |e: &Enrollment| e.student_id == student_id)?;
        let removed = enrollments.len();
        for e in enrollments {
            repo::delete::<Enrollment>(tx, &e.id)?;
        }
        repo::delete::<Student>(tx, student_id)?;
        Ok(removed)
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCourseOutcome {
    pub assignments_removed: usize,
    pub enrollments_removed: usize,
}

/// Deletes a course with its assignments and enrollments, fixing the counts
/// of every class that referenced it and the old owner's cache. Grades stay.
pub fn delete_course(store: &mut Store, course_id: &str) -> Result<DeleteCourseOutcome, OpError> {
    store.run_transaction(|tx| {
        let course = repo::get::<Course>(tx, course_id)?;

        let assignments = repo::list(tx, |a: &ClassCourseAssignment| a.course_id == course_id)?;
        let mut affected_classes = HashSet::new();
        let assignments_removed = assignments.len();
        for a in assignments {
            affected_classes.insert(a.class_id.clone());
            repo::delete::<ClassCourseAssignment>(tx, &a.id)?;
        }

        let enrollments = repo::list(tx, |e: &Enrollment| e.course_id == course_id)?;
        let enrollments_removed = enrollments.len();
        for e in enrollments {
            repo::delete::<Enrollment>(tx, &e.id)?;
        }

        repo::delete::<Course>(tx, course_id)?;
        for class_id in &affected_classes {
            recount_class(tx, class_id)?;
        }
        if let Some(uid) = &course.teacher_id {
            refresh_teacher_cache(tx, uid)?;
        }

        Ok(DeleteCourseOutcome {
            assignments_removed,
            enrollments_removed,
        })
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClassOutcome {
    pub assignments_removed: usize,
    pub enrollments_removed: usize,
    pub students_unlinked: usize,
}

/// Deletes a class, its assignments, and the enrollments derived from them;
/// students survive with their class link cleared. Grades stay.
pub fn delete_class(store: &mut Store, class_id: &str) -> Result<DeleteClassOutcome, OpError> {
    store.run_transaction(|tx| {
        repo::get::<Class>(tx, class_id)?;

        let assignments = assignments_of_class(tx, class_id)?;
        let students = students_of_class(tx, class_id)?;

        let mut enrollments_removed = 0;
        for s in &students {
            for a in &assignments {
                enrollments_removed += remove_enrollments_of_pair(tx, &s.id, &a.course_id)?;
            }
        }
        let assignments_removed = assignments.len();
        for a in assignments {
            repo::delete::<ClassCourseAssignment>(tx, &a.id)?;
        }
        let students_unlinked = students.len();
        for mut s in students {
            s.class_id = None;
            s.class_name = None;
            repo::update(tx, s)?;
        }
        repo::delete::<Class>(tx, class_id)?;

        Ok(DeleteClassOutcome {
            assignments_removed,
            enrollments_removed,
            students_unlinked,
        })
    })
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealReport {
    pub enrollments_created: usize,
    pub enrollments_removed: usize,
    pub duplicates_removed: usize,
    pub counts_fixed: usize,
    pub names_fixed: usize,
    pub caches_fixed: usize,
    pub students_unlinked: usize,
}

/// Full re-derivation pass: rebuilds every engine-maintained field from the
/// authoritative records. This is the recovery path for any half-applied
/// state the store could have been left in by an outside writer or a crash
/// between an owning write and its name propagation.
pub fn heal(store: &mut Store) -> Result<HealReport, OpError> {
    store.run_transaction(|tx| {
        let mut report = HealReport::default();

        // Students pointing at a class that no longer exists lose the link.
        let mut students = repo::list(tx, |_: &Student| true)?;
        for s in &mut students {
            if let Some(class_id) = s.class_id.clone() {
                if repo::find::<Class>(tx, &class_id)?.is_none() {
                    s.class_id = None;
                    s.class_name = None;
                    *s = repo::update(tx, s.clone())?;
                    report.students_unlinked += 1;
                }
            }
        }

        // Duplicate assignments for the same (class, course) pair collapse to
        // the earliest.
        let assignments = repo::list(tx, |_: &ClassCourseAssignment| true)?;
        let mut seen_pairs = HashSet::new();
        let mut live_assignments = Vec::new();
        for a in assignments {
            if seen_pairs.insert((a.class_id.clone(), a.course_id.clone())) {
                live_assignments.push(a);
            } else {
                repo::delete::<ClassCourseAssignment>(tx, &a.id)?;
                report.duplicates_removed += 1;
            }
        }

        // The valid enrollment set is exactly {(student, course) : student's
        // class has an assignment for the course}.
        let mut valid_pairs: HashSet<(String, String)> = HashSet::new();
        for s in &students {
            if let Some(class_id) = &s.class_id {
                for a in live_assignments.iter().filter(|a| &a.class_id == class_id) {
                    valid_pairs.insert((s.id.clone(), a.course_id.clone()));
                }
            }
        }

        let mut seen_enrollments: HashSet<(String, String)> = HashSet::new();
        for e in repo::list(tx, |_: &Enrollment| true)? {
            let pair = (e.student_id.clone(), e.course_id.clone());
            let dangling = repo::find::<Student>(tx, &e.student_id)?.is_none()
                || repo::find::<Course>(tx, &e.course_id)?.is_none();
            if dangling || !valid_pairs.contains(&pair) {
                repo::delete::<Enrollment>(tx, &e.id)?;
                report.enrollments_removed += 1;
            } else if !seen_enrollments.insert(pair) {
                repo::delete::<Enrollment>(tx, &e.id)?;
                report.duplicates_removed += 1;
            }
        }
        for (student_id, course_id) in &valid_pairs {
            if seen_enrollments.contains(&(student_id.clone(), course_id.clone())) {
                continue;
            }
            let student = repo::get::<Student>(tx, student_id)?;
            let course = repo::get::<Course>(tx, course_id)?;
            if ensure_enrollment(tx, &student, &course)? {
                report.enrollments_created += 1;
            }
        }

        // Derived counts and every denormalized name copy.
        for class in repo::list(tx, |_: &Class| true)? {
            let count = live_assignments
                .iter()
                .filter(|a| a.class_id == class.id)
                .count() as i64;
            if class.assigned_courses_count != count {
                let mut class = class;
                class.assigned_courses_count = count;
                repo::update(tx, class)?;
                report.counts_fixed += 1;
            }
        }

        for mut a in repo::list(tx, |_: &ClassCourseAssignment| true)? {
            let class = repo::find::<Class>(tx, &a.class_id)?;
            let course = repo::find::<Course>(tx, &a.course_id)?;
            let mut dirty = false;
            if let Some(class) = class {
                if a.class_name != class.name {
                    a.class_name = class.name;
                    dirty = true;
                }
            }
            if let Some(course) = course {
                if a.course_name != course.name {
                    a.course_name = course.name;
                    dirty = true;
                }
            }
            if dirty {
                repo::update(tx, a)?;
                report.names_fixed += 1;
            }
        }

        for mut e in repo::list(tx, |_: &Enrollment| true)? {
            let mut dirty = false;
            if let Some(s) = repo::find::<Student>(tx, &e.student_id)? {
                if e.student_name != s.full_name {
                    e.student_name = s.full_name;
                    dirty = true;
                }
            }
            if let Some(c) = repo::find::<Course>(tx, &e.course_id)? {
                if e.course_name != c.name {
                    e.course_name = c.name;
                    dirty = true;
                }
            }
            if dirty {
                repo::update(tx, e)?;
                report.names_fixed += 1;
            }
        }

        for mut g in repo::list(tx, |_: &Grade| true)? {
            let mut dirty = false;
            if let Some(s) = repo::find::<Student>(tx, &g.student_id)? {
                if g.student_name != s.full_name {
                    g.student_name = s.full_name;
                    dirty = true;
                }
            }
            if let Some(c) = repo::find::<Course>(tx, &g.course_id)? {
                if g.course_name != c.name {
                    g.course_name = c.name;
                    dirty = true;
                }
            }
            if dirty {
                repo::update(tx, g)?;
                report.names_fixed += 1;
            }
        }

        for mut s in repo::list(tx, |_: &Student| true)? {
            if let Some(class_id) = s.class_id.clone() {
                if let Some(class) = repo::find::<Class>(tx, &class_id)? {
                    if s.class_name.as_deref() != Some(class.name.as_str()) {
                        s.class_name = Some(class.name);
                        repo::update(tx, s)?;
                        report.names_fixed += 1;
                    }
                }
            }
        }

        for mut c in repo::list(tx, |c: &Course| c.teacher_id.is_some())? {
            let uid = c.teacher_id.clone().unwrap_or_default();
            if let Some(p) = repo::find::<UserProfile>(tx, &uid)? {
                let name = p.display_name.unwrap_or(p.email);
                if c.teacher_name.as_deref() != Some(name.as_str()) {
                    c.teacher_name = Some(name);
                    repo::update(tx, c)?;
                    report.names_fixed += 1;
                }
            }
        }

        for p in repo::list(tx, |_: &UserProfile| true)? {
            if refresh_teacher_cache(tx, &p.id)? {
                report.caches_fixed += 1;
            }
        }

        Ok(report)
    })
}
