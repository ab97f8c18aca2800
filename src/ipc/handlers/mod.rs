pub mod audit;
pub mod backup;
pub mod core;
pub mod courses;
pub mod imports;
pub mod ranking;
pub mod skills;
pub mod students;
