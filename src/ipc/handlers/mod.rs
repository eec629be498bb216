pub mod assignments;
pub mod classes;
pub mod core;
pub mod courses;
pub mod enrollments;
pub mod feedback;
pub mod grades;
pub mod groups;
pub mod profiles;
pub mod schools;
pub mod students;
pub mod terms;
